//! WebRTC signaling relay. The gateway never inspects SDP or ICE payloads.

pub mod signaling;
