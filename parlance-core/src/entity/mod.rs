//! Immutable message and session entities shared across the SDK.

pub mod character;
pub mod packet;
pub mod session;

pub use character::{Character, Scene};
pub use packet::{
    Actor, ActorType, AudioChunkEvent, Cancellation, ControlAction, ControlEvent, Packet,
    PacketId, PacketPayload, Routing, SessionControlEvent, TextEvent,
};
pub use session::SessionToken;
