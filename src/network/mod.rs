//! Network Layer
//!
//! Everything between two replicas: typed-data signing, the peer message
//! set, a transport, snapshot synchronization and the session that drives
//! a replica through the protocol.

pub mod signing;
pub mod protocol;
pub mod transport;
pub mod sync;
pub mod session;

pub use signing::{
    struct_hash, typed_data_hash, verify_state_signature, LocalSigner, SignatureCheck, SigningDomain,
    SigningError, StateSignature, StateSigner,
};
pub use protocol::{Envelope, PeerMessage};
pub use transport::{MemoryTransport, TransportError};
pub use sync::{SyncError, SyncOutcome, Synchronizer};
pub use session::{Delivery, Invite, Replica, SessionError};
