//! `XpuInitiator` workflows with fake backends and host collaborators.

use std::path::PathBuf;

use libxpu::backend::XpuBackend;
use libxpu::{PciSlot, TargetSpec, VolumeInitiator, XpuError, XpuInitiator};

use crate::common::{Events, FakeBackend, FakeControlPlane, FakeHost, config, nvme_backend, volume};

fn initiator(target: &str, backend: Box<dyn XpuBackend>, host: &FakeHost) -> XpuInitiator {
    let target: TargetSpec = target.parse().unwrap();
    XpuInitiator::with_backend(target, volume(), backend, host.services(), &config()).unwrap()
}

#[tokio::test]
async fn nvme_transport_allocates_and_waits_for_model() {
    let events = Events::default();
    let host = FakeHost::new(&events);
    host.free_slots(&[PciSlot::new(2, 0)]);
    host.device_at("0000:03:00.0", "/dev/nvme5n1");
    let mut xpu = initiator("xpu-opi-nvme", FakeBackend::boxed(&events), &host);

    let path = xpu.connect().await.unwrap();

    assert_eq!(path, PathBuf::from("/dev/nvme5n1"));
    assert_eq!(xpu.bdf(), Some("0000:03:00.0"));
    assert_eq!(xpu.device_path(), Some(&path));
    assert_eq!(
        events.all(),
        [
            "watcher.check vol-1",
            "allocator.allocate 2",
            "backend.connect Pci { vpf: 64 }",
            "watcher.wait 0000:03:00.0 Some(\"vol-1\")",
        ]
    );
}

#[tokio::test]
async fn virtio_blk_transport_round_trip() {
    let events = Events::default();
    let host = FakeHost::new(&events);
    host.free_slots(&[PciSlot::new(0, 5)]);
    host.device_at("0000:01:05.0", "/dev/vda");
    let mut xpu = initiator("xpu-opi-virtioblk", FakeBackend::boxed(&events), &host);

    assert_eq!(xpu.connect().await.unwrap(), PathBuf::from("/dev/vda"));
    assert_eq!(
        events.take(),
        [
            "watcher.check vol-1",
            "allocator.allocate 2",
            "backend.connect Pci { vpf: 5 }",
            "watcher.wait 0000:01:05.0 None",
        ]
    );

    xpu.disconnect().await.unwrap();
    assert_eq!(
        events.take(),
        [
            "watcher.lookup 0000:01:05.0",
            "backend.disconnect",
            "watcher.gone /dev/vda",
        ]
    );
    assert_eq!(xpu.bdf(), None);
    assert_eq!(xpu.device_path(), None);
}

#[tokio::test]
async fn tcp_transport_uses_local_initiator() {
    let events = Events::default();
    let host = FakeHost::new(&events);
    let mut xpu = initiator("xpu-sma-nvmftcp", FakeBackend::boxed(&events), &host);

    assert_eq!(xpu.connect().await.unwrap(), PathBuf::from("/dev/nvme9n1"));
    assert_eq!(
        events.take(),
        [
            "backend.connect NvmfTcp { target_port: 4421 }",
            "nvmf.connect nqn.2022-04.io.spdk.csi:cnode0:uuid:vol-1",
        ]
    );

    xpu.disconnect().await.unwrap();
    assert_eq!(
        events.take(),
        [
            "nvmf.disconnect nqn.2022-04.io.spdk.csi:cnode0:uuid:vol-1",
            "backend.disconnect",
        ]
    );
}

#[test]
fn malformed_target_types_are_rejected() {
    for bad in ["bogus-x-y", "xpu-opi", "xpu-opi-nvme-extra", ""] {
        let err = bad.parse::<TargetSpec>().unwrap_err();
        assert!(matches!(err, XpuError::InvalidTargetType(_)), "{bad}: {err}");
    }
}

#[tokio::test]
async fn existing_device_short_circuits() {
    let events = Events::default();
    let host = FakeHost::new(&events);
    host.existing(Some("/dev/nvme2n1"));
    host.free_slots(&[PciSlot::new(0, 0)]);
    let mut xpu = initiator("xpu-opi-nvme", FakeBackend::boxed(&events), &host);

    assert_eq!(xpu.connect().await.unwrap(), PathBuf::from("/dev/nvme2n1"));
    assert_eq!(events.all(), ["watcher.check vol-1"]);
    assert_eq!(events.count("allocator."), 0);
    assert_eq!(events.count("backend."), 0);
}

#[tokio::test]
async fn device_timeout_disconnects_backend() {
    let events = Events::default();
    let host = FakeHost::new(&events);
    host.free_slots(&[PciSlot::new(0, 1)]);
    let mut xpu = initiator("xpu-opi-nvme", FakeBackend::boxed(&events), &host);

    let err = xpu.connect().await.unwrap_err();
    assert!(matches!(err, XpuError::DeviceTimeout { .. }), "{err}");
    assert_eq!(
        events.all(),
        [
            "watcher.check vol-1",
            "allocator.allocate 2",
            "backend.connect Pci { vpf: 1 }",
            "watcher.wait 0000:01:01.0 Some(\"vol-1\")",
            "backend.disconnect",
            "allocator.release pf0/vf1",
        ]
    );
    assert_eq!(xpu.bdf(), None);
}

#[tokio::test]
async fn backend_failure_is_not_compensated_twice() {
    let events = Events::default();
    let host = FakeHost::new(&events);
    host.free_slots(&[PciSlot::new(0, 0)]);
    let mut xpu = initiator("xpu-opi-nvme", FakeBackend::failing(&events), &host);

    let err = xpu.connect().await.unwrap_err();
    assert!(err.rpc_code().is_some());
    assert_eq!(events.count("watcher.wait"), 0);
    assert_eq!(events.count("backend.disconnect"), 0);
    assert_eq!(events.all().last().map(String::as_str), Some("allocator.release pf0/vf0"));
}

#[tokio::test]
async fn successful_attach_keeps_its_function() {
    let events = Events::default();
    let host = FakeHost::new(&events);
    host.free_slots(&[PciSlot::new(0, 0)]);
    host.device_at("0000:01:00.0", "/dev/nvme1n1");
    let mut xpu = initiator("xpu-opi-nvme", FakeBackend::boxed(&events), &host);

    xpu.connect().await.unwrap();
    assert_eq!(events.count("allocator.release"), 0);
}

#[tokio::test]
async fn exhausted_functions_stop_before_backend() {
    let events = Events::default();
    let host = FakeHost::new(&events);
    let mut xpu = initiator("xpu-opi-virtioblk", FakeBackend::boxed(&events), &host);

    let err = xpu.connect().await.unwrap_err();
    assert!(matches!(err, XpuError::FunctionsExhausted { bridges: 2 }));
    assert_eq!(events.count("backend."), 0);
}

#[tokio::test]
async fn tcp_initiator_failure_disconnects_backend() {
    let events = Events::default();
    let host = FakeHost::new(&events);
    host.nvmf_fails();
    let mut xpu = initiator("xpu-sma-nvmftcp", FakeBackend::boxed(&events), &host);

    let err = xpu.connect().await.unwrap_err();
    assert!(matches!(err, XpuError::Initiator(_)));
    assert_eq!(events.all().last().map(String::as_str), Some("backend.disconnect"));
    assert_eq!(xpu.device_path(), None);
}

#[tokio::test]
async fn pci_disconnect_without_device_fails() {
    let events = Events::default();
    let host = FakeHost::new(&events);
    let mut xpu = initiator("xpu-opi-nvme", FakeBackend::boxed(&events), &host);

    let err = xpu.disconnect().await.unwrap_err();
    assert!(matches!(err, XpuError::DeviceNotFound(_)), "{err}");
    assert_eq!(events.count("backend."), 0);
}

#[tokio::test]
async fn device_not_gone_is_reported() {
    let events = Events::default();
    let host = FakeHost::new(&events);
    host.free_slots(&[PciSlot::new(0, 0)]);
    host.device_at("0000:01:00.0", "/dev/nvme1n1");
    let mut xpu = initiator("xpu-opi-nvme", FakeBackend::boxed(&events), &host);
    xpu.connect().await.unwrap();
    events.take();

    host.existing(Some("/dev/nvme1n1"));
    host.device_stays();
    let err = xpu.disconnect().await.unwrap_err();
    assert!(matches!(err, XpuError::DeviceNotGone { .. }), "{err}");
    assert_eq!(
        events.all(),
        [
            "watcher.check vol-1",
            "backend.disconnect",
            "watcher.gone /dev/nvme1n1",
        ]
    );
}

#[tokio::test]
async fn nvme_end_to_end() {
    let events = Events::default();
    let host = FakeHost::new(&events);
    host.free_slots(&[PciSlot::new(2, 0)]);
    host.device_at("0000:03:00.0", "/dev/nvme0n1");
    let plane = FakeControlPlane::new();
    let mut xpu = initiator(
        "xpu-opi-nvme",
        Box::new(nvme_backend(&plane, volume())),
        &host,
    );

    assert_eq!(xpu.connect().await.unwrap(), PathBuf::from("/dev/nvme0n1"));
    assert_eq!(xpu.bdf(), Some("0000:03:00.0"));
    assert_eq!(
        plane.take_calls(),
        [
            "CreateNvmeSubsystem spdkcsi-vol-1",
            "CreateNvmeController spdkcsi-64",
            "CreateNvmfRemoteController spckcsi-vol-1",
            "CreateNvmeNamespace spdcksi-vol-1",
        ]
    );

    host.existing(Some("/dev/nvme0n1"));
    xpu.disconnect().await.unwrap();
    assert_eq!(
        plane.ops(),
        [
            "DeleteNvmfRemoteController",
            "DeleteNvmeController",
            "DeleteNvmeSubsystem",
        ]
    );
    assert!(plane.live().is_empty());

    // All handles are empty now: a second detach sends nothing remote.
    plane.take_calls();
    xpu.disconnect().await.unwrap();
    assert!(plane.calls().is_empty());
}

#[tokio::test]
async fn nvme_end_to_end_namespace_failure() {
    let events = Events::default();
    let host = FakeHost::new(&events);
    host.free_slots(&[PciSlot::new(2, 0)]);
    host.device_at("0000:03:00.0", "/dev/nvme0n1");
    let plane = FakeControlPlane::new();
    plane.fail("CreateNvmeNamespace");
    let mut xpu = initiator(
        "xpu-opi-nvme",
        Box::new(nvme_backend(&plane, volume())),
        &host,
    );

    let err = xpu.connect().await.unwrap_err();
    assert!(matches!(err, XpuError::Rpc { op: "CreateNvmeNamespace", .. }), "{err}");
    assert!(plane.live().is_empty(), "left behind: {:?}", plane.live());
    assert_eq!(events.count("watcher.wait"), 0);
    assert_eq!(xpu.device_path(), None);
}
