#![no_main]

use libfuzzer_sys::fuzz_target;
use room_session_client::{ClientSettings, ConnectionTarget};

fuzz_target!(|data: &[u8]| {
    if let Ok(settings) = serde_json::from_slice::<ClientSettings>(data) {
        let _ = settings.target();
    }

    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(target) = ConnectionTarget::parse(text) {
            // Derivation is total for any parsed target.
            let endpoint = target.endpoint();
            assert!(endpoint.ends_with("/ws"));
        }
    }
});
