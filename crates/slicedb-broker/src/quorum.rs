//! Quorum vote accumulation
//!
//! For N replicas, `Q = N/2 + 1` votes decide both reads and writes.
//! Votes arrive on a channel sized N; a decision is returned as soon
//! as one is forced, without waiting for stragglers. Errors carried by
//! votes are already logged at the dispatch site, so votes only record
//! the outcome shape.

use slicedb_common::{Error, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A replica's answer to a read: payload, not-found, or failure
pub type ReadVote<T> = std::result::Result<Option<T>, ()>;

/// A replica's answer to a write
pub type WriteVote = std::result::Result<(), ()>;

fn quorum(total: usize) -> usize {
    total / 2 + 1
}

/// Accumulate read votes until a decision is forced.
///
/// Returns the payload once a quorum agrees, `None` once not-found is
/// certain, a too-many-errors failure once a quorum has become
/// impossible, and the cancellation error as soon as `cancel` fires.
pub async fn handle_read<T>(
    cancel: &CancellationToken,
    votes: &mut mpsc::Receiver<ReadVote<T>>,
    total: usize,
) -> Result<Option<T>> {
    let quorum = quorum(total);
    let mut n_ok = 0;
    let mut n_nil = 0;
    let mut n_err = 0;

    for _ in 0..total {
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Canceled),
            vote = votes.recv() => match vote {
                None => break,
                Some(Err(())) => {
                    n_err += 1;
                    if n_err > total - quorum {
                        return Err(Error::TooManyErrors);
                    }
                }
                Some(Ok(Some(data))) => {
                    n_ok += 1;
                    if n_ok >= quorum {
                        return Ok(Some(data));
                    }
                }
                Some(Ok(None)) => {
                    n_nil += 1;
                    if n_nil > total - quorum {
                        return Ok(None);
                    }
                }
            }
        }
    }
    Err(Error::Undetermined)
}

/// Accumulate write votes until a decision is forced
pub async fn handle_write(
    cancel: &CancellationToken,
    votes: &mut mpsc::Receiver<WriteVote>,
    total: usize,
) -> Result<()> {
    let quorum = quorum(total);
    let mut n_ok = 0;
    let mut n_err = 0;

    for _ in 0..total {
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Canceled),
            vote = votes.recv() => match vote {
                None => break,
                Some(Err(())) => {
                    n_err += 1;
                    if n_err > total - quorum {
                        return Err(Error::TooManyErrors);
                    }
                }
                Some(Ok(())) => {
                    n_ok += 1;
                    if n_ok >= quorum {
                        return Ok(());
                    }
                }
            }
        }
    }
    Err(Error::Undetermined)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run_read(votes: Vec<ReadVote<&'static str>>) -> Result<Option<&'static str>> {
        let total = votes.len();
        let (tx, mut rx) = mpsc::channel(total);
        for vote in votes {
            tx.send(vote).await.unwrap();
        }
        handle_read(&CancellationToken::new(), &mut rx, total).await
    }

    #[tokio::test]
    async fn test_read_quorum_agreement() {
        // 3 replicas, 1 failure, 2 agree
        let got = run_read(vec![Ok(Some("hello")), Err(()), Ok(Some("hello"))])
            .await
            .unwrap();
        assert_eq!(got, Some("hello"));
    }

    #[tokio::test]
    async fn test_read_returns_early_on_quorum() {
        let (tx, mut rx) = mpsc::channel(3);
        tx.send(Ok(Some("v"))).await.unwrap();
        tx.send(Ok(Some("v"))).await.unwrap();
        // third vote never arrives; decision must not wait for it
        let got = handle_read(&CancellationToken::new(), &mut rx, 3)
            .await
            .unwrap();
        assert_eq!(got, Some("v"));
    }

    #[tokio::test]
    async fn test_read_nil_majority() {
        // 3 replicas, 2 nil, 1 ok
        let got = run_read(vec![Ok(None), Ok(Some("v")), Ok(None)]).await.unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn test_read_too_many_errors() {
        let err = run_read(vec![Err(()), Ok(Some("v")), Err(())])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TooManyErrors));
    }

    #[tokio::test]
    async fn test_read_undetermined_mix() {
        // 4 replicas: 2 ok, 1 nil, 1 err forces no decision (Q = 3)
        let err = run_read(vec![Ok(Some("v")), Ok(None), Err(()), Ok(Some("v"))])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Undetermined));
    }

    #[tokio::test]
    async fn test_read_canceled() {
        let (_tx, mut rx) = mpsc::channel::<ReadVote<&str>>(3);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = handle_read(&cancel, &mut rx, 3).await.unwrap_err();
        assert!(matches!(err, Error::Canceled));
    }

    #[tokio::test]
    async fn test_write_quorum() {
        let (tx, mut rx) = mpsc::channel(3);
        tx.send(Err(())).await.unwrap();
        tx.send(Ok(())).await.unwrap();
        tx.send(Ok(())).await.unwrap();
        handle_write(&CancellationToken::new(), &mut rx, 3)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_write_too_many_errors() {
        let (tx, mut rx) = mpsc::channel(3);
        tx.send(Err(())).await.unwrap();
        tx.send(Err(())).await.unwrap();
        let err = handle_write(&CancellationToken::new(), &mut rx, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TooManyErrors));
    }

    #[tokio::test]
    async fn test_even_replica_count_needs_majority() {
        // N = 4 → Q = 3; two payloads plus two errors cannot decide a read
        let err = run_read(vec![Ok(Some("v")), Ok(Some("v")), Err(()), Err(())])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TooManyErrors));
    }
}
