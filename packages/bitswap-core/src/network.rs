use async_trait::async_trait;

use crate::error::NetworkError;
use crate::message::Message;
use crate::peer::PeerId;

/// The transport collaborator. Dial, mux and stream-open are out of scope
/// here; the core only needs to open a logical session to a peer and
/// deliver best-effort messages to it.
#[async_trait]
pub trait Network<P: PeerId>: Send + Sync {
    async fn connect_to(&self, peer: &P) -> Result<(), NetworkError>;
    /// Best-effort delivery; failure is reported to the caller rather than
    /// retried internally. Retrying is the want manager's / envelope loop's
    /// job.
    async fn send_message(&self, peer: &P, msg: Message) -> Result<(), NetworkError>;
}
