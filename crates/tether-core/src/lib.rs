pub mod envelope;
pub mod outbound;

pub use envelope::{decode_envelope, decode_text, DecodeError, EventEnvelope, StatusPhase};
pub use outbound::{
    InteractionPayload, KeyEventType, KeyboardInput, MouseButton, MouseEventType, MouseInput,
    NavigationAction, OutboundCommand,
};
