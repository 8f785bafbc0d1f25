//! Fuzz target for message payload decoding.
//!
//! Run with:
//! ```bash
//! cd crates/proto
//! cargo +nightly fuzz run ssh_message -- -max_total_time=300
//! ```

#![no_main]
use cssh_proto::ssh::pty::TerminalModes;
use cssh_proto::ssh::Message;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = Message::decode(data) {
        let encoded = message.encode();
        let again = Message::decode(&encoded).expect("re-encoded message must decode");
        assert_eq!(message.message_type(), again.message_type());
    }
    let _ = TerminalModes::parse(data);
});
