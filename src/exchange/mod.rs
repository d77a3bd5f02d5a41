mod reassembler;
mod session;
mod supervisor;

pub use self::reassembler::ChunkReassembler;
pub use self::session::{ProtocolSession, SessionEnd, SessionReport, SessionState};
pub(crate) use self::supervisor::OutcomeSlot;
