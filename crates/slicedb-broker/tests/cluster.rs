//! End-to-end cluster tests: real nodes served over HTTP, driven
//! through the signed control plane, read and written through the
//! broker.

use std::sync::Arc;
use std::time::Duration;

use slicedb_broker::Broker;
use slicedb_common::{Blob, Identity, Key};
use slicedb_node::{Node, NodeRpc};
use slicedb_spec::{Draft, DraftNode, SpecManager};
use slicedb_storage::{blobio, mark, MemStore, Store};

struct TestNode {
    node: Arc<Node>,
    store: Arc<dyn Store>,
    spec_mgr: Arc<SpecManager>,
    addr: String,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
}

async fn start_node() -> TestNode {
    let store: Arc<dyn Store> = Arc::new(MemStore::new());
    let spec_mgr = Arc::new(SpecManager::new(store.clone()));
    let node = Node::new(store.clone(), spec_mgr.clone()).unwrap();
    node.start();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let app = slicedb_node::router(node.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            })
            .await
            .unwrap();
    });

    TestNode {
        node,
        store,
        spec_mgr,
        addr,
        shutdown: Some(shutdown_tx),
    }
}

impl TestNode {
    fn stop_serving(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            tx.send(()).ok();
        }
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool, what: &str) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

fn draft_of(replicas: u32, nodes: &[(&TestNode, u32)]) -> Draft {
    Draft {
        replicas,
        nodes: nodes
            .iter()
            .map(|(n, weight)| DraftNode {
                id: n.node.id().to_string(),
                addr: n.addr.clone(),
                weight: *weight,
            })
            .collect(),
    }
}

#[tokio::test]
async fn test_bootstrap_round_trip() {
    let a = start_node().await;
    let master = Arc::new(Identity::generate());

    // invite over the wire, signed by the master
    let rpc = NodeRpc::new().with_identity(master.clone(), "");
    let node_id = rpc.invite(&a.addr, None).await.unwrap();
    assert_eq!(node_id, a.node.id());

    // propose revision 0 over the wire; the node self-approves
    let spec = slicedb_spec::Spec {
        revision: 0,
        sat: draft_of(1, &[(&a, 1)]).alloc().unwrap(),
    };
    let rpc = NodeRpc::new().with_identity(master.clone(), node_id.clone());
    rpc.propose_spec(&a.addr, &spec).await.unwrap();

    let status = rpc.get_status(&a.addr).await.unwrap();
    assert_eq!(status.spec_revisions.newest, 0);
    assert_eq!(status.spec_revisions.synced, 0);
    assert_eq!(status.spec_revisions.approved, 0);

    let sync_status = rpc.get_sync_status(&a.addr, 0).await.unwrap();
    assert_eq!(sync_status.synced_slice_count, 256);
    assert_eq!(sync_status.total_slice_count, 256);

    // a blob written through the broker reads back identical
    let broker = Broker::new(a.store.clone(), a.spec_mgr.clone());
    let blob = Blob::new(b"hello slicedb".to_vec());
    broker.put_blob(blob.clone()).await.unwrap();

    let got = broker.get_blob(blob.key()).await.unwrap().unwrap();
    assert_eq!(got.data(), blob.data());

    // absent key decides not-found
    assert!(broker
        .get_blob(Key::of_data(b"missing"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_unsigned_control_requests_rejected() {
    let a = start_node().await;
    let master = Arc::new(Identity::generate());
    let rpc = NodeRpc::new().with_identity(master.clone(), "");
    rpc.invite(&a.addr, None).await.unwrap();

    let spec = slicedb_spec::Spec {
        revision: 0,
        sat: draft_of(1, &[(&a, 1)]).alloc().unwrap(),
    };

    // no signature at all
    let unsigned = NodeRpc::new();
    assert!(unsigned.propose_spec(&a.addr, &spec).await.is_err());

    // signed by a stranger
    let stranger = NodeRpc::new().with_identity(Arc::new(Identity::generate()), "");
    assert!(stranger.propose_spec(&a.addr, &spec).await.is_err());

    // wrong target id
    let wrong_target = NodeRpc::new().with_identity(master, "somebody-else");
    assert!(wrong_target.propose_spec(&a.addr, &spec).await.is_err());
}

#[tokio::test]
async fn test_write_quorum_marks_fault_for_dead_replica() {
    let a = start_node().await;
    let b = start_node().await;
    let mut c = start_node().await;
    let master = Arc::new(Identity::generate());

    let nodes = [&a, &b, &c];
    for n in nodes {
        let rpc = NodeRpc::new().with_identity(master.clone(), "");
        rpc.invite(&n.addr, None).await.unwrap();
    }

    let spec = slicedb_spec::Spec {
        revision: 0,
        sat: draft_of(3, &[(&a, 1), (&b, 1), (&c, 1)]).alloc().unwrap(),
    };
    for n in nodes {
        let rpc = NodeRpc::new().with_identity(master.clone(), n.node.id().to_string());
        rpc.propose_spec(&n.addr, &spec).await.unwrap();
    }

    // one replica goes dark; a write must still reach quorum (2 of 3)
    c.stop_serving();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let broker = Broker::new(a.store.clone(), a.spec_mgr.clone());
    let blob = Blob::new(b"partially replicated".to_vec());
    broker.put_blob(blob.clone()).await.unwrap();

    // the background drain records the shortfall as a fault mark
    let store = a.store.clone();
    let key = blob.key();
    wait_until(
        move || {
            mark::marked_blob_keys(store.as_ref(), mark::FAULT_MARK)
                .filter_map(Result::ok)
                .any(|k| k == key)
        },
        "fault mark",
    )
    .await;

    // surviving replicas answer the read
    let got = broker.get_blob(blob.key()).await.unwrap().unwrap();
    assert_eq!(got.data(), blob.data());
}

#[tokio::test]
async fn test_migration_syncs_new_node() {
    let a = start_node().await;
    let master = Arc::new(Identity::generate());

    // bootstrap a single-node cluster and fill it with blobs
    let rpc = NodeRpc::new().with_identity(master.clone(), "");
    rpc.invite(&a.addr, None).await.unwrap();
    let rev0 = slicedb_spec::Spec {
        revision: 0,
        sat: draft_of(1, &[(&a, 1)]).alloc().unwrap(),
    };
    NodeRpc::new()
        .with_identity(master.clone(), a.node.id().to_string())
        .propose_spec(&a.addr, &rev0)
        .await
        .unwrap();

    let broker = Broker::new(a.store.clone(), a.spec_mgr.clone());
    let mut blobs = Vec::new();
    for i in 0u32..64 {
        let blob = Blob::new(format!("payload {i}").into_bytes());
        broker.put_blob(blob.clone()).await.unwrap();
        blobs.push(blob);
    }

    // invite a second node with the approved spec, then propose the
    // rebalanced revision 1 to both
    let b = start_node().await;
    NodeRpc::new()
        .with_identity(master.clone(), "")
        .invite(&b.addr, Some(&rev0))
        .await
        .unwrap();

    let rev1 = slicedb_spec::Spec {
        revision: 1,
        sat: draft_of(1, &[(&a, 1), (&b, 1)]).alloc().unwrap(),
    };
    for n in [&a, &b] {
        NodeRpc::new()
            .with_identity(master.clone(), n.node.id().to_string())
            .propose_spec(&n.addr, &rev1)
            .await
            .unwrap();
    }

    // trigger background sync on both and wait for completion
    for n in [&a, &b] {
        NodeRpc::new()
            .with_identity(master.clone(), n.node.id().to_string())
            .sync_to_spec(&n.addr, 1)
            .await
            .unwrap();
    }
    let (an, bn) = (a.node.clone(), b.node.clone());
    wait_until(
        move || {
            an.get_status().unwrap().spec_revisions.synced == 1
                && bn.get_status().unwrap().spec_revisions.synced == 1
        },
        "both nodes synced",
    )
    .await;

    // approve revision 1 everywhere
    for n in [&a, &b] {
        NodeRpc::new()
            .with_identity(master.clone(), n.node.id().to_string())
            .approve_spec(&n.addr, 1)
            .await
            .unwrap();
    }

    // every blob B now owns was pulled from A
    let b_entry = rev1.sat.find_entry(b.node.id()).unwrap();
    assert!(!b_entry.slices.is_empty());
    let mut moved = 0;
    for blob in &blobs {
        if b_entry.contains_key(&blob.key().to_hex()) {
            moved += 1;
            let got = blobio::get_blob(b.store.as_ref(), blob.key())
                .unwrap()
                .expect("blob missing on new node");
            assert_eq!(got.data(), blob.data());
        }
    }
    assert!(moved > 0, "no blob landed in the new node's slices");

    // reads now served under the approved revision 1
    let got = broker.get_blob(blobs[0].key()).await.unwrap().unwrap();
    assert_eq!(got.data(), blobs[0].data());
}
