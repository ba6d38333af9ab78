pub mod engine;
pub mod input;
pub mod mapper;
pub mod throttler;

pub use engine::{run_frame_loop, FrameInput, FrameView};
pub use input::{
    click_commands, end_session_command, history_command, key_command, key_press_commands,
    navigate_command, normalize_url, pointer_command, start_session_command, viewport_command,
    Modifiers, NavigationError, PointerEvent,
};
pub use mapper::{letterbox, map_pointer, Letterbox, Point, Size};
pub use throttler::{
    decode_frame_payload, DecodedFrame, FrameConfig, FrameDecodeError, FrameOutcome, FrameStats,
    FrameStreamThrottler, ImageFormat, Viewport, DEFAULT_FLUSH_PERIOD, DEFAULT_VIEWPORT,
};
