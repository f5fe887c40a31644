//! OPI NVMe backend against the in-memory control plane.

use libxpu::backend::XpuBackend;
use libxpu::backend::opi_nvme::NvmeHandles;
use libxpu::{ConnectParams, VolumeContext, XpuError};

use crate::common::{FakeControlPlane, nvme_backend, volume};

const VPF: ConnectParams = ConnectParams::Pci { vpf: 64 };

fn creates(calls: &[String]) -> Vec<String> {
    calls
        .iter()
        .filter(|c| c.starts_with("Create"))
        .cloned()
        .collect()
}

#[tokio::test]
async fn connect_builds_chain_in_order() {
    let plane = FakeControlPlane::new();
    let mut backend = nvme_backend(&plane, volume());

    backend.connect(VPF).await.unwrap();

    assert_eq!(
        plane.calls(),
        [
            "CreateNvmeSubsystem spdkcsi-vol-1",
            "CreateNvmeController spdkcsi-64",
            "CreateNvmfRemoteController spckcsi-vol-1",
            "CreateNvmeNamespace spdcksi-vol-1",
        ]
    );
    assert_eq!(
        backend.handles(),
        NvmeHandles {
            subsystem: Some("nvmeSubsystems/spdkcsi-vol-1".into()),
            controller: Some("nvmeControllers/spdkcsi-64".into()),
            remote_controller: Some("nvmfRemoteControllers/spckcsi-vol-1".into()),
            namespace: Some("nvmeNamespaces/spdcksi-vol-1".into()),
        }
    );
    assert_eq!(
        plane.parent_of("nvmeNamespaces/spdcksi-vol-1").as_deref(),
        Some("nvmeSubsystems/spdkcsi-vol-1")
    );

    // The slot encoding travels in the physical function; vf is always 0.
    let ep = plane.endpoints()[0];
    assert_eq!(ep.physical_function, 64);
    assert_eq!(ep.virtual_function, 0);
}

#[tokio::test]
async fn disconnect_skips_namespace_and_is_idempotent() {
    let plane = FakeControlPlane::new();
    let mut backend = nvme_backend(&plane, volume());
    backend.connect(VPF).await.unwrap();
    plane.take_calls();

    backend.disconnect().await.unwrap();
    assert_eq!(
        plane.take_calls(),
        [
            "DeleteNvmfRemoteController nvmfRemoteControllers/spckcsi-vol-1",
            "DeleteNvmeController nvmeControllers/spdkcsi-64",
            "DeleteNvmeSubsystem nvmeSubsystems/spdkcsi-vol-1",
        ]
    );
    assert!(backend.handles().is_empty());
    assert!(plane.live().is_empty(), "left behind: {:?}", plane.live());

    backend.disconnect().await.unwrap();
    assert!(plane.calls().is_empty());
}

#[tokio::test]
async fn rollback_at_every_step_clears_all_handles() {
    let cases = [
        (
            "CreateNvmeController",
            vec!["DeleteNvmeSubsystem"],
        ),
        (
            "CreateNvmfRemoteController",
            vec!["DeleteNvmeSubsystem", "DeleteNvmeController"],
        ),
        (
            "CreateNvmeNamespace",
            vec![
                "DeleteNvmeSubsystem",
                "DeleteNvmeController",
                "DeleteNvmfRemoteController",
            ],
        ),
    ];

    for (failing, cleanup) in cases {
        let plane = FakeControlPlane::new();
        plane.fail(failing);
        let mut backend = nvme_backend(&plane, volume());

        let err = backend.connect(VPF).await.unwrap_err();
        match &err {
            XpuError::Rpc { op, .. } => assert_eq!(*op, failing),
            other => panic!("{failing}: unexpected error {other}"),
        }

        let deletes: Vec<String> = plane
            .ops()
            .into_iter()
            .filter(|op| op.starts_with("Delete"))
            .collect();
        assert_eq!(deletes, cleanup, "{failing}");
        assert!(backend.handles().is_empty(), "{failing}: {:?}", backend.handles());
        assert!(plane.live().is_empty(), "{failing}: {:?}", plane.live());
    }
}

#[tokio::test]
async fn subsystem_failure_needs_no_cleanup() {
    let plane = FakeControlPlane::new();
    plane.fail("CreateNvmeSubsystem");
    let mut backend = nvme_backend(&plane, volume());

    let err = backend.connect(VPF).await.unwrap_err();
    assert_eq!(err.rpc_code(), Some(tonic::Code::Internal));
    assert_eq!(plane.ops(), ["CreateNvmeSubsystem"]);
    assert!(backend.handles().is_empty());
}

#[tokio::test]
async fn namespace_failure_is_reported_after_compensation() {
    let plane = FakeControlPlane::new();
    plane.fail("CreateNvmeNamespace");
    let mut backend = nvme_backend(&plane, volume());

    let err = backend.connect(VPF).await.unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("CreateNvmeNamespace"), "{msg}");
    assert!(msg.contains("spdcksi-vol-1"), "{msg}");

    let handles = backend.handles();
    assert_eq!(handles.subsystem, None);
    assert_eq!(handles.controller, None);
    assert_eq!(handles.remote_controller, None);
}

#[tokio::test]
async fn failed_cleanup_keeps_handle_for_retry() {
    let plane = FakeControlPlane::new();
    plane.fail("CreateNvmeNamespace");
    plane.fail("DeleteNvmeController");
    let mut backend = nvme_backend(&plane, volume());

    let err = backend.connect(VPF).await.unwrap_err();
    assert!(matches!(err, XpuError::Rpc { op: "CreateNvmeNamespace", .. }));
    assert_eq!(
        backend.handles(),
        NvmeHandles {
            controller: Some("nvmeControllers/spdkcsi-64".into()),
            ..Default::default()
        }
    );

    plane.clear_failures();
    backend.disconnect().await.unwrap();
    assert!(backend.handles().is_empty());
    assert!(plane.live().is_empty());
}

#[tokio::test]
async fn retry_targets_the_same_ids() {
    let plane = FakeControlPlane::new();
    plane.fail("CreateNvmeNamespace");
    let mut first = nvme_backend(&plane, volume());
    first.connect(VPF).await.unwrap_err();
    let first_ids = creates(&plane.take_calls());

    plane.clear_failures();
    let mut second = nvme_backend(&plane, volume());
    second.connect(VPF).await.unwrap();
    assert_eq!(creates(&plane.take_calls()), first_ids);

    // A third attempt finds everything in place and still succeeds.
    let mut third = nvme_backend(&plane, volume());
    third.connect(VPF).await.unwrap();
    assert_eq!(third.handles(), second.handles());
}

#[tokio::test]
async fn invalid_port_stops_before_remote_controller_call() {
    let plane = FakeControlPlane::new();
    let mut ctx: std::collections::HashMap<String, String> = [
        ("model", "vol-1"),
        ("targetAddr", "10.0.0.5"),
        ("targetPort", "not-a-port"),
        ("nqn", "nqn.2016-06.io.spdk:cnode1"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v.to_owned()))
    .collect();
    let mut backend = nvme_backend(&plane, VolumeContext::new(ctx.clone()));

    let err = backend.connect(VPF).await.unwrap_err();
    assert!(matches!(err, XpuError::InvalidArgument(_)), "{err}");
    assert!(!plane.ops().iter().any(|op| op == "CreateNvmfRemoteController"));
    assert!(backend.handles().is_empty());
    assert!(plane.live().is_empty());

    ctx.remove("targetPort");
    let mut backend = nvme_backend(&plane, VolumeContext::new(ctx));
    assert!(backend.connect(VPF).await.unwrap_err().is_config());
}

#[tokio::test]
async fn configuration_errors_make_no_calls() {
    let plane = FakeControlPlane::new();

    let mut backend = nvme_backend(&plane, volume());
    let err = backend
        .connect(ConnectParams::NvmfTcp { target_port: 4421 })
        .await
        .unwrap_err();
    assert!(err.is_config());

    let mut backend = nvme_backend(&plane, VolumeContext::default());
    let err = backend.connect(VPF).await.unwrap_err();
    assert!(matches!(err, XpuError::InvalidArgument(_)));

    assert!(plane.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn hung_call_hits_its_deadline_and_rolls_back() {
    let plane = FakeControlPlane::new();
    plane.hang("CreateNvmeNamespace");
    let mut backend = nvme_backend(&plane, volume());

    let err = backend.connect(VPF).await.unwrap_err();
    assert_eq!(err.rpc_code(), Some(tonic::Code::DeadlineExceeded));
    assert!(backend.handles().is_empty());
    assert!(plane.live().is_empty());
}
