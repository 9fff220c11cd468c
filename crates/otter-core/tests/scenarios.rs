//! End-to-end replica scenarios against the in-memory repository.

use std::collections::BTreeSet;
use std::sync::Arc;

use otter_core::dictionary::{DictionaryOperation, DictionaryOtSystem, DictionaryState, SetOperation};
use otter_core::{InMemoryRepository, OtCommit, OtNode, OtRepository, OtState, OtSystem};

type Repo = InMemoryRepository<u64, DictionaryOperation>;
type Node = OtNode<u64, DictionaryOperation, OtCommit<u64, DictionaryOperation>, Repo, DictionaryOtSystem>;

fn set(key: &str, prev: Option<&str>, next: Option<&str>) -> DictionaryOperation {
    DictionaryOperation::single(key, SetOperation::set(prev, next))
}

async fn setup() -> (Arc<Repo>, u64) {
    let repo = Arc::new(Repo::new());
    let root = repo.init_root(0).await.expect("root");
    (repo, root)
}

fn node(repo: &Arc<Repo>) -> Node {
    OtNode::new(Arc::clone(repo), Arc::new(DictionaryOtSystem))
}

fn state_of(diffs: &[DictionaryOperation]) -> DictionaryState {
    let mut state = DictionaryState::new();
    state.apply_all(diffs);
    state
}

#[tokio::test]
async fn sequential_sets_squash_to_one_assignment() {
    let (repo, root) = setup().await;
    let node = node(&repo);

    let mut head = root;
    let mut level = 1;
    for (prev, next) in [(None, "1"), (Some("1"), "2"), (Some("2"), "3")] {
        level += 1;
        let commit = node
            .create_commit(head, vec![set("a", prev, Some(next))], level)
            .await
            .expect("create");
        head = node.push(commit).await.expect("push").commit_id;
    }

    let checkout = node.checkout().await.expect("checkout");
    assert_eq!(checkout.commit_id, head);
    assert_eq!(checkout.diffs, vec![set("a", None, Some("3"))]);
}

#[tokio::test]
async fn concurrent_replicas_converge_on_both_edits() {
    let (repo, root) = setup().await;
    let replica_a = node(&repo);
    let replica_b = node(&repo);

    let commit_a = replica_a
        .create_commit(root, vec![set("x", None, Some("A"))], 2)
        .await
        .expect("create");
    let commit_b = replica_b
        .create_commit(root, vec![set("y", None, Some("B"))], 2)
        .await
        .expect("create");
    let id_a = *commit_a.id();
    let id_b = *commit_b.id();

    let pushed_a = replica_a.push(commit_a).await.expect("push a");
    assert_eq!(pushed_a.commit_id, id_a);
    assert!(pushed_a.diffs.is_empty());

    let pushed_b = replica_b.push(commit_b).await.expect("push b");
    assert_eq!(pushed_b.diffs, vec![set("x", None, Some("A"))]);
    let merged = pushed_b.commit_id;

    assert_eq!(repo.get_heads().await.expect("heads"), BTreeSet::from([merged]));
    let merge = repo.load_commit(&merged).await.expect("merge commit");
    assert_eq!(merge.parent_ids(), BTreeSet::from([id_a, id_b]));

    let fetched_a = replica_a.fetch(&id_a).await.expect("fetch a");
    assert_eq!(fetched_a.commit_id, merged);
    assert_eq!(fetched_a.diffs, vec![set("y", None, Some("B"))]);

    let checkout = state_of(&replica_a.checkout().await.expect("checkout").diffs);
    assert_eq!(checkout.get("x"), Some("A"));
    assert_eq!(checkout.get("y"), Some("B"));
}

#[tokio::test]
async fn checkout_starts_from_nearest_snapshot() {
    let (repo, root) = setup().await;
    let node = node(&repo);
    let system = DictionaryOtSystem;

    let snapshot_commit = node
        .create_commit(root, vec![set("a", None, Some("history"))], 2)
        .await
        .expect("create");
    let s = node.push(snapshot_commit).await.expect("push").commit_id;

    // A snapshot that disagrees with history proves checkout reads it
    // instead of replaying from the root.
    let snapshot = vec![set("a", None, Some("snapshot"))];
    repo.save_snapshot(&s, snapshot.clone()).await.expect("snapshot");

    let d1 = vec![set("b", None, Some("1"))];
    let d2 = vec![set("b", Some("1"), Some("2"))];
    let c1 = node.create_commit(s, d1.clone(), 3).await.expect("create");
    let c1 = node.push(c1).await.expect("push").commit_id;
    let c2 = node.create_commit(c1, d2.clone(), 4).await.expect("create");
    node.push(c2).await.expect("push");

    let checkout = node.checkout().await.expect("checkout");
    let expected = system.squash(&[snapshot, d1, d2].concat());
    assert_eq!(checkout.diffs, expected);
    assert_eq!(checkout.level, 4);
}

#[tokio::test]
async fn saved_snapshot_matches_replayed_state() {
    let (repo, root) = setup().await;
    let node = node(&repo);

    let c1 = node
        .create_commit(root, vec![set("k", None, Some("1"))], 2)
        .await
        .expect("create");
    let c1 = node.push(c1).await.expect("push").commit_id;
    let c2 = node
        .create_commit(c1, vec![set("k", Some("1"), Some("2")), set("j", None, Some("x"))], 3)
        .await
        .expect("create");
    let c2 = node.push(c2).await.expect("push").commit_id;

    let before = node.checkout().await.expect("checkout");
    node.algorithms().save_snapshot(&c2).await.expect("save");
    assert!(repo.has_snapshot(&c2).await.expect("lookup"));

    let after = node.checkout().await.expect("checkout");
    assert_eq!(state_of(&after.diffs), state_of(&before.diffs));
}

#[tokio::test]
async fn conflicting_edits_resolve_to_the_greater_value() {
    let (repo, root) = setup().await;
    let replica_a = node(&repo);
    let replica_b = node(&repo);

    let low = replica_a
        .create_commit(root, vec![set("k", None, Some("apple"))], 2)
        .await
        .expect("create");
    let high = replica_b
        .create_commit(root, vec![set("k", None, Some("pear"))], 2)
        .await
        .expect("create");
    let low_id = *low.id();

    replica_b.push(high).await.expect("push high");
    let pushed_low = replica_a.push(low).await.expect("push low");
    assert_eq!(pushed_low.diffs, vec![set("k", Some("apple"), Some("pear"))]);

    let fetched = replica_a.fetch(&low_id).await.expect("fetch");
    let mut state = state_of(&[set("k", None, Some("apple"))]);
    state.apply_all(&fetched.diffs);
    assert_eq!(state.get("k"), Some("pear"));
}

#[tokio::test]
async fn graph_dump_shows_merge() {
    let (repo, root) = setup().await;
    let replica_a = node(&repo);
    let replica_b = node(&repo);

    let a = replica_a
        .create_commit(root, vec![set("x", None, Some("A"))], 2)
        .await
        .expect("create");
    let b = replica_b
        .create_commit(root, vec![set("y", None, Some("B"))], 2)
        .await
        .expect("create");
    replica_a.push(a).await.expect("push");
    let merged = replica_b.push(b).await.expect("push").commit_id;

    let heads = repo.get_heads().await.expect("heads");
    let graph = replica_a
        .algorithms()
        .load_graph(&heads, None)
        .await
        .expect("graph");
    assert_eq!(graph.len(), 4);
    assert_eq!(graph.tips(), vec![&merged]);
    assert_eq!(graph.roots(), vec![&root]);

    let dot = graph
        .to_graphviz(Some(&merged), |diffs| format!("{} diff(s)", diffs.len()))
        .expect("render");
    assert!(dot.contains("style=filled"));

    let window = replica_a
        .algorithms()
        .load_graph(&heads, Some(2))
        .await
        .expect("graph");
    assert_eq!(window.len(), 2);
}
