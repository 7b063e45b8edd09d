//! Wire protocol — the message envelope, its checksum/validation, and the
//! length-prefixed frame codec used to move it over TCP (and, unframed, over
//! UDP for discovery).
//!
//! Every peer on the mesh speaks the same envelope regardless of transport,
//! so the types live in one module the way the teacher's `lan::protocol`
//! keeps `PeerMessage` and `DiscoveryBeacon` together.

mod envelope;
mod frame;

pub use envelope::{
    decode_binary, encode_binary, validate_envelope, Envelope, EnvelopeType, ValidationError,
    VALID_ACTIONS,
};
pub use frame::{read_frame, write_frame, FrameError, MAX_FRAME_SIZE};
