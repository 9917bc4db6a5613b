#![no_main]

use libfuzzer_sys::fuzz_target;
use room_session_client::protocol::ServerFrame;

fuzz_target!(|data: &[u8]| {
    // Raw bytes, including serde_json's own UTF-8 validation.
    let _ = serde_json::from_slice::<ServerFrame>(data);

    // The path the connection loop takes for every text frame.
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(frame) = ServerFrame::decode(text) {
            let _ = frame.into_event();
        }
    }
});
