//! Concurrent pushes and deterministic merges.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use otter_core::dictionary::{DictionaryOperation, DictionaryOtSystem, DictionaryState, SetOperation};
use otter_core::repo::{CommitHash, ContentHashIds};
use otter_core::{InMemoryRepository, OtAlgorithms, OtCommit, OtNode, OtRepository, OtState};

type Repo = InMemoryRepository<u64, DictionaryOperation>;
type Node = OtNode<u64, DictionaryOperation, OtCommit<u64, DictionaryOperation>, Repo, DictionaryOtSystem>;
type HashRepo = InMemoryRepository<CommitHash, DictionaryOperation, ContentHashIds>;

fn set(key: &str, next: &str) -> DictionaryOperation {
    DictionaryOperation::single(key, SetOperation::set(None, Some(next)))
}

#[tokio::test]
async fn interleaved_pushes_all_reach_the_final_head() {
    let repo = Arc::new(Repo::new());
    let root = repo.init_root(0).await.expect("root");
    let node = Node::new(Arc::clone(&repo), Arc::new(DictionaryOtSystem));

    let mut commits = Vec::new();
    for replica in 0..6 {
        let key = format!("k{replica}");
        commits.push(
            node.create_commit(root, vec![set(&key, "v")], 2)
                .await
                .expect("create"),
        );
    }
    let pushed: BTreeSet<u64> = commits.iter().map(|commit| *commit.id()).collect();

    let results = join_all(commits.into_iter().map(|commit| node.push(commit))).await;
    for result in results {
        result.expect("push");
    }

    // Racing pushes may leave several merge heads; one more merge settles them.
    let head = node
        .algorithms()
        .merge_and_update_heads()
        .await
        .expect("settle");
    assert_eq!(repo.get_heads().await.expect("heads"), BTreeSet::from([head]));

    let graph = node
        .algorithms()
        .load_graph(&BTreeSet::from([head]), None)
        .await
        .expect("graph");
    for id in &pushed {
        assert!(graph.is_ancestor(id, &head), "commit {id} not merged");
    }

    let checkout = node.checkout().await.expect("checkout");
    let mut state = DictionaryState::new();
    state.apply_all(&checkout.diffs);
    assert_eq!(state.len(), 6);
}

async fn branched_history(repo: &HashRepo) -> BTreeSet<CommitHash> {
    let root = repo.init_root(0).await.expect("root");
    let mut heads = BTreeSet::new();
    for (key, value) in [("x", "A"), ("y", "B"), ("x", "C")] {
        let commit = repo
            .create_commit(0, root, vec![set(key, value)], 2)
            .await
            .expect("create");
        heads.insert(*commit.id());
        repo.push_commit(commit).await.expect("push");
    }
    heads
}

#[tokio::test]
async fn independent_replicas_build_identical_merges() {
    let first = OtAlgorithms::new(
        Arc::new(HashRepo::with_ids(ContentHashIds)),
        Arc::new(DictionaryOtSystem),
    );
    let second = OtAlgorithms::new(
        Arc::new(HashRepo::with_ids(ContentHashIds)),
        Arc::new(DictionaryOtSystem),
    );

    let heads = branched_history(first.repository()).await;
    assert_eq!(branched_history(second.repository()).await, heads);

    let left = first.merge(&heads).await.expect("merge");
    let right = second.merge(&heads).await.expect("merge");
    assert_eq!(left, right);

    let left_commit = first.repository().load_commit(&left).await.expect("load");
    let right_commit = second.repository().load_commit(&right).await.expect("load");
    assert!(left_commit.same_content(&right_commit));
}

#[tokio::test]
async fn repeated_merge_is_idempotent() {
    let algorithms = OtAlgorithms::new(
        Arc::new(HashRepo::with_ids(ContentHashIds)),
        Arc::new(DictionaryOtSystem),
    );
    let heads = branched_history(algorithms.repository()).await;

    let once = algorithms.merge(&heads).await.expect("merge");
    let commits = algorithms.repository().stats().await.commits;
    let twice = algorithms.merge(&heads).await.expect("merge");

    assert_eq!(once, twice);
    assert_eq!(algorithms.repository().stats().await.commits, commits);
}
