//! In-process links between a host peer and a page peer.

use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::mpsc::unbounded_channel;

use crate::transport;
use crate::transport::Transport;

/// One end of an in-memory duplex link.
///
/// Dropping an end closes the link: the survivor's `recv` yields `None` and its `send` fails.
pub struct ChannelEnd {
    outbox: UnboundedSender<Vec<u8>>,
    inbox: Mutex<UnboundedReceiver<Vec<u8>>>,
}

impl ChannelEnd {
    /// Two ends wired back to back.
    pub fn pair() -> (Self, Self) {
        let (to_right, from_left) = unbounded_channel();
        let (to_left, from_right) = unbounded_channel();
        let left = Self { outbox: to_right, inbox: Mutex::new(from_right) };
        let right = Self { outbox: to_left, inbox: Mutex::new(from_left) };
        (left, right)
    }
}

#[async_trait::async_trait]
impl Transport for ChannelEnd {
    async fn send(&self, payload: &[u8]) -> transport::Result<()> {
        if self.outbox.send(payload.to_vec()).is_err() {
            return Err(transport::Error::Closed("other end dropped".into()));
        }
        Ok(())
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        Ok(self.inbox.lock().await.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_is_duplex_and_ordered() {
        let (a, b) = ChannelEnd::pair();
        a.send(b"one").await.unwrap();
        a.send(b"two").await.unwrap();
        b.send(b"back").await.unwrap();

        assert_eq!(b.recv().await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(b.recv().await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(a.recv().await.unwrap(), Some(b"back".to_vec()));
    }

    #[tokio::test]
    async fn test_drop_closes_other_end() {
        let (a, b) = ChannelEnd::pair();
        drop(a);
        assert_eq!(b.recv().await.unwrap(), None);
        assert!(matches!(b.send(b"late").await, Err(transport::Error::Closed(_))));
    }
}
