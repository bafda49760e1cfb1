//! Protocol constants and configuration defaults.
//!
//! Wire values are fixed by the Z-Wave Security command class and MUST NOT be
//! changed. Timing values are defaults for [`TxConfig`](super::TxConfig) and
//! [`S0Config`](super::S0Config) and can be tuned per deployment.

use std::time::Duration;

// =============================================================================
// NODE ADDRESSING
// =============================================================================

/// Lowest classic node id.
pub const MIN_CLASSIC_NODE_ID: u16 = 1;

/// Highest classic node id.
pub const MAX_CLASSIC_NODE_ID: u16 = 232;

/// Lowest Long Range node id.
pub const MIN_LR_NODE_ID: u16 = 256;

/// Highest Long Range node id.
pub const MAX_LR_NODE_ID: u16 = 4000;

/// Broadcast destination.
pub const BROADCAST_NODE_ID: u16 = 0xFF;

// =============================================================================
// FRAME SIZES
// =============================================================================

/// Largest application payload handed to the radio in one frame.
pub const MAX_FRAME_PAYLOAD: usize = 46;

/// Security 0 overhead: CC + command + sender nonce + sequence byte + nonce id + MAC.
pub const S0_ENCAPSULATION_OVERHEAD: usize = 2 + S0_NONCE_SIZE + 1 + 1 + S0_MAC_SIZE;

/// Largest command that fits a single S0 encapsulated frame.
pub const S0_MAX_SINGLE_FRAME_PAYLOAD: usize = MAX_FRAME_PAYLOAD - S0_ENCAPSULATION_OVERHEAD;

// =============================================================================
// SECURITY 0 (COMMAND_CLASS_SECURITY)
// =============================================================================

/// Security command class identifier.
pub const COMMAND_CLASS_SECURITY: u8 = 0x98;

/// Supported Security command class version.
pub const COMMAND_CLASS_SECURITY_VERSION: u8 = 1;

/// Network key size (AES-128).
pub const S0_KEY_SIZE: usize = 16;

/// Nonce size.
pub const S0_NONCE_SIZE: usize = 8;

/// Truncated CBC-MAC size.
pub const S0_MAC_SIZE: usize = 8;

/// AES block size.
pub const AES_BLOCK_SIZE: usize = 16;

/// Plaintext used to derive the authentication key from the network key.
pub const S0_AUTH_KEY_PATTERN: u8 = 0x55;

/// Plaintext used to derive the encryption key from the network key.
pub const S0_ENC_KEY_PATTERN: u8 = 0xAA;

/// Scheme byte advertising Security 0 support (bit 0 clear).
pub const S0_SCHEME_0: u8 = 0x00;

/// Marker separating supported and controlled classes in a commands report.
pub const COMMAND_CLASS_MARK: u8 = 0xEF;

// =============================================================================
// TRANSMISSION DEFAULTS
// =============================================================================

/// Pending entries the queue accepts before rejecting with `QueueFull`.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Attempts per entry before `RetryExhausted`.
pub const DEFAULT_RETRY_LIMIT: u32 = 2;

/// Time the radio gets to report a transmission result.
pub const DEFAULT_TRANSMIT_TIMEOUT: Duration = Duration::from_secs(65);

/// First retry delay, doubled for each further attempt.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Upper bound for the doubled retry delay.
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(4);

/// Retry backoff multiplier.
pub const RETRY_BACKOFF_MULTIPLIER: u32 = 2;

/// Wait per expected response frame of the session that just completed.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(1500);

/// Wait per frame announced through `set_expected_additional_frames`.
pub const DEFAULT_ADDITIONAL_FRAMES_TIMEOUT: Duration = Duration::from_millis(1000);

/// Wait while the protocol stack is busy sending its own frames.
pub const DEFAULT_PROTOCOL_BUSY_BACKOFF: Duration = Duration::from_millis(500);

/// Wait after an unsolicited routed frame so its routed ack can pass.
pub const DEFAULT_UNSOLICITED_ROUTED_BACKOFF: Duration = Duration::from_millis(300);

// =============================================================================
// SECURITY 0 DEFAULTS
// =============================================================================

/// Lifetime of a nonce we issued to a peer.
pub const DEFAULT_NONCE_LIFETIME: Duration = Duration::from_secs(10);

/// Lifetime of a nonce a peer issued to us.
pub const DEFAULT_PEER_NONCE_LIFETIME: Duration = Duration::from_secs(10);

/// Time a peer gets to answer a Nonce Get.
pub const DEFAULT_NONCE_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Time a peer gets to answer each inclusion step.
pub const DEFAULT_INCLUSION_STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Time the first half of a sequenced message is kept for its second half.
pub const DEFAULT_REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(10);
