//! Usher - meeting bot core
//!
//! Keeps a roster of a video meeting by paging through the participant
//! list, admits people from the waiting room, and delivers chat messages
//! with confirmation from the transcript. The platform UI is reached only
//! through the traits in [`surface`].

pub mod actions;
pub mod admission;
pub mod allow_list;
pub mod chat;
pub mod clock;
pub mod commands;
pub mod error;
pub mod events;
pub mod options;
pub mod parser;
pub mod participant;
pub mod replay;
pub mod roster;
pub mod scheduler;
pub mod session;
pub mod surface;
pub mod telemetry;
pub mod watcher;

pub use error::{ChatError, SessionError, SurfaceError};
pub use events::{EventBus, EventSubscriber, SessionEvent};
pub use participant::{Participant, ParticipantStatus, Roster};
pub use session::{Session, Surfaces, TickReport};
