//! Security command class wire format.
//!
//! Every frame starts with the command class byte `0x98` and a command id.
//! Message Encapsulation layout:
//!
//! ```text
//! +------+-----+----------------+------------+----------+---------+
//! | 0x98 | cmd | sender nonce 8 | ciphertext | nonce id | MAC 8   |
//! +------+-----+----------------+------------+----------+---------+
//! ```
//!
//! The ciphertext decrypts to a sequence byte followed by the command.

use super::keys::NetworkKey;
use super::nonce::Nonce;
use crate::core::{
    FrameError, COMMAND_CLASS_MARK, COMMAND_CLASS_SECURITY, S0_KEY_SIZE, S0_MAC_SIZE,
    S0_NONCE_SIZE,
};

/// Command ids of the Security command class.
pub mod command {
    /// Commands Supported Get.
    pub const COMMANDS_SUPPORTED_GET: u8 = 0x02;
    /// Commands Supported Report.
    pub const COMMANDS_SUPPORTED_REPORT: u8 = 0x03;
    /// Scheme Get.
    pub const SCHEME_GET: u8 = 0x04;
    /// Scheme Report.
    pub const SCHEME_REPORT: u8 = 0x05;
    /// Network Key Set.
    pub const NETWORK_KEY_SET: u8 = 0x06;
    /// Network Key Verify.
    pub const NETWORK_KEY_VERIFY: u8 = 0x07;
    /// Scheme Inherit.
    pub const SCHEME_INHERIT: u8 = 0x08;
    /// Nonce Get.
    pub const NONCE_GET: u8 = 0x40;
    /// Nonce Report.
    pub const NONCE_REPORT: u8 = 0x80;
    /// Message Encapsulation.
    pub const MESSAGE_ENCAPSULATION: u8 = 0x81;
    /// Message Encapsulation Nonce Get.
    pub const MESSAGE_ENCAPSULATION_NONCE_GET: u8 = 0xC1;
}

/// Minimum encapsulated frame: header, sender nonce, one ciphertext byte,
/// nonce id, MAC.
const MIN_ENCAPSULATION_SIZE: usize = 2 + S0_NONCE_SIZE + 1 + 1 + S0_MAC_SIZE;

/// Sequencing header prepended to the plaintext.
///
/// ```text
/// bit 5: second frame, bit 4: sequenced, bits 0-3: sequence counter
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SequenceInfo {
    /// Counter shared by both halves of a sequenced message.
    pub counter: u8,
    /// Message spans two frames.
    pub sequenced: bool,
    /// This is the second frame.
    pub second_frame: bool,
}

impl SequenceInfo {
    const COUNTER_MASK: u8 = 0x0F;
    const SEQUENCED: u8 = 0x10;
    const SECOND_FRAME: u8 = 0x20;

    /// Header of an unsequenced single frame.
    pub const SINGLE: Self = Self {
        counter: 0,
        sequenced: false,
        second_frame: false,
    };

    /// Parse from byte.
    pub fn from_byte(b: u8) -> Self {
        Self {
            counter: b & Self::COUNTER_MASK,
            sequenced: b & Self::SEQUENCED != 0,
            second_frame: b & Self::SECOND_FRAME != 0,
        }
    }

    /// Convert to byte.
    pub fn to_byte(self) -> u8 {
        let mut b = self.counter & Self::COUNTER_MASK;
        if self.sequenced {
            b |= Self::SEQUENCED;
        }
        if self.second_frame {
            b |= Self::SECOND_FRAME;
        }
        b
    }
}

/// Message Encapsulation (`0x81`) or Message Encapsulation Nonce Get (`0xC1`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncapsulatedFrame {
    /// Receiver is asked to report a new nonce (`0xC1`).
    pub request_nonce: bool,
    /// Sender half of the IV.
    pub sender_nonce: Nonce,
    /// Encrypted sequence byte and command.
    pub ciphertext: Vec<u8>,
    /// Identifier of the receiver nonce used.
    pub receiver_nonce_id: u8,
    /// Truncated CBC-MAC.
    pub mac: [u8; S0_MAC_SIZE],
}

impl EncapsulatedFrame {
    /// Command id on the wire.
    pub fn command_id(&self) -> u8 {
        if self.request_nonce {
            command::MESSAGE_ENCAPSULATION_NONCE_GET
        } else {
            command::MESSAGE_ENCAPSULATION
        }
    }
}

/// A Security command class frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityCommand {
    /// Ask which classes the node supports securely.
    CommandsSupportedGet,
    /// Classes supported and controlled securely.
    CommandsSupportedReport {
        /// Further reports to follow.
        reports_to_follow: u8,
        /// Supported classes.
        supported: Vec<u8>,
        /// Controlled classes, after the mark.
        controlled: Vec<u8>,
    },
    /// Ask for supported schemes.
    SchemeGet {
        /// Schemes the sender supports.
        schemes: u8,
    },
    /// Supported schemes. Bit 0 clear means scheme 0 is supported.
    SchemeReport {
        /// Schemes byte.
        schemes: u8,
    },
    /// Transfer the network key.
    NetworkKeySet {
        /// The key.
        key: NetworkKey,
    },
    /// Confirms the network key, sent encrypted with it.
    NetworkKeyVerify,
    /// Scheme inheritance towards secondary controllers.
    SchemeInherit {
        /// Schemes byte.
        schemes: u8,
    },
    /// Request a nonce.
    NonceGet,
    /// A nonce issued by the sender.
    NonceReport {
        /// The nonce.
        nonce: Nonce,
    },
    /// Encrypted payload.
    MessageEncapsulation(EncapsulatedFrame),
}

impl SecurityCommand {
    /// Parse a frame starting at the command class byte.
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < 2 {
            return Err(FrameError::TooShort {
                expected: 2,
                actual: data.len(),
            });
        }
        if data[0] != COMMAND_CLASS_SECURITY {
            return Err(FrameError::NotSecurityFrame(data[0]));
        }

        let body = &data[2..];
        match data[1] {
            command::COMMANDS_SUPPORTED_GET => Ok(Self::CommandsSupportedGet),
            command::COMMANDS_SUPPORTED_REPORT => {
                let (&reports_to_follow, classes) = body.split_first().ok_or(FrameError::TooShort {
                    expected: 3,
                    actual: data.len(),
                })?;
                let (supported, controlled) = match classes.iter().position(|&c| c == COMMAND_CLASS_MARK) {
                    Some(mark) => (classes[..mark].to_vec(), classes[mark + 1..].to_vec()),
                    None => (classes.to_vec(), Vec::new()),
                };
                Ok(Self::CommandsSupportedReport {
                    reports_to_follow,
                    supported,
                    controlled,
                })
            }
            command::SCHEME_GET => Ok(Self::SchemeGet {
                schemes: schemes_byte(body, data.len())?,
            }),
            command::SCHEME_REPORT => Ok(Self::SchemeReport {
                schemes: schemes_byte(body, data.len())?,
            }),
            command::SCHEME_INHERIT => Ok(Self::SchemeInherit {
                schemes: schemes_byte(body, data.len())?,
            }),
            command::NETWORK_KEY_SET => {
                let key: [u8; S0_KEY_SIZE] = body
                    .get(..S0_KEY_SIZE)
                    .and_then(|k| k.try_into().ok())
                    .ok_or(FrameError::TooShort {
                        expected: 2 + S0_KEY_SIZE,
                        actual: data.len(),
                    })?;
                Ok(Self::NetworkKeySet {
                    key: NetworkKey::new(key),
                })
            }
            command::NETWORK_KEY_VERIFY => Ok(Self::NetworkKeyVerify),
            command::NONCE_GET => Ok(Self::NonceGet),
            command::NONCE_REPORT => {
                let nonce: [u8; S0_NONCE_SIZE] = body
                    .get(..S0_NONCE_SIZE)
                    .and_then(|n| n.try_into().ok())
                    .ok_or(FrameError::TooShort {
                        expected: 2 + S0_NONCE_SIZE,
                        actual: data.len(),
                    })?;
                Ok(Self::NonceReport {
                    nonce: Nonce::from_bytes(nonce),
                })
            }
            cmd @ (command::MESSAGE_ENCAPSULATION | command::MESSAGE_ENCAPSULATION_NONCE_GET) => {
                parse_encapsulation(cmd, data).map(Self::MessageEncapsulation)
            }
            other => Err(FrameError::UnknownCommand(other)),
        }
    }

    /// Encode to wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![COMMAND_CLASS_SECURITY];
        match self {
            Self::CommandsSupportedGet => out.push(command::COMMANDS_SUPPORTED_GET),
            Self::CommandsSupportedReport {
                reports_to_follow,
                supported,
                controlled,
            } => {
                out.push(command::COMMANDS_SUPPORTED_REPORT);
                out.push(*reports_to_follow);
                out.extend_from_slice(supported);
                if !controlled.is_empty() {
                    out.push(COMMAND_CLASS_MARK);
                    out.extend_from_slice(controlled);
                }
            }
            Self::SchemeGet { schemes } => out.extend([command::SCHEME_GET, *schemes]),
            Self::SchemeReport { schemes } => out.extend([command::SCHEME_REPORT, *schemes]),
            Self::SchemeInherit { schemes } => out.extend([command::SCHEME_INHERIT, *schemes]),
            Self::NetworkKeySet { key } => {
                out.push(command::NETWORK_KEY_SET);
                out.extend_from_slice(key.as_bytes());
            }
            Self::NetworkKeyVerify => out.push(command::NETWORK_KEY_VERIFY),
            Self::NonceGet => out.push(command::NONCE_GET),
            Self::NonceReport { nonce } => {
                out.push(command::NONCE_REPORT);
                out.extend_from_slice(nonce.as_bytes());
            }
            Self::MessageEncapsulation(frame) => {
                out.push(frame.command_id());
                out.extend_from_slice(frame.sender_nonce.as_bytes());
                out.extend_from_slice(&frame.ciphertext);
                out.push(frame.receiver_nonce_id);
                out.extend_from_slice(&frame.mac);
            }
        }
        out
    }

    /// Diagnostic name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CommandsSupportedGet => "CommandsSupportedGet",
            Self::CommandsSupportedReport { .. } => "CommandsSupportedReport",
            Self::SchemeGet { .. } => "SchemeGet",
            Self::SchemeReport { .. } => "SchemeReport",
            Self::NetworkKeySet { .. } => "NetworkKeySet",
            Self::NetworkKeyVerify => "NetworkKeyVerify",
            Self::SchemeInherit { .. } => "SchemeInherit",
            Self::NonceGet => "NonceGet",
            Self::NonceReport { .. } => "NonceReport",
            Self::MessageEncapsulation(_) => "MessageEncapsulation",
        }
    }
}

fn schemes_byte(body: &[u8], actual: usize) -> Result<u8, FrameError> {
    body.first().copied().ok_or(FrameError::TooShort {
        expected: 3,
        actual,
    })
}

fn parse_encapsulation(cmd: u8, data: &[u8]) -> Result<EncapsulatedFrame, FrameError> {
    if data.len() < MIN_ENCAPSULATION_SIZE {
        return Err(FrameError::TooShort {
            expected: MIN_ENCAPSULATION_SIZE,
            actual: data.len(),
        });
    }

    let nonce_end = 2 + S0_NONCE_SIZE;
    let mac_start = data.len() - S0_MAC_SIZE;
    let id_pos = mac_start - 1;

    let mut sender = [0u8; S0_NONCE_SIZE];
    sender.copy_from_slice(&data[2..nonce_end]);
    let mut mac = [0u8; S0_MAC_SIZE];
    mac.copy_from_slice(&data[mac_start..]);
    if u8::try_from(id_pos - nonce_end).is_err() {
        return Err(FrameError::InvalidField("ciphertext length"));
    }

    Ok(EncapsulatedFrame {
        request_nonce: cmd == command::MESSAGE_ENCAPSULATION_NONCE_GET,
        sender_nonce: Nonce::from_bytes(sender),
        ciphertext: data[nonce_end..id_pos].to_vec(),
        receiver_nonce_id: data[id_pos],
        mac,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nonce_report() {
        let raw = hex::decode("9880a1b2c3d4e5f60718").unwrap();
        let cmd = SecurityCommand::parse(&raw).unwrap();
        let SecurityCommand::NonceReport { nonce } = cmd else {
            panic!("expected nonce report, got {cmd:?}");
        };
        assert_eq!(nonce.id(), 0xa1);
        assert_eq!(SecurityCommand::NonceReport { nonce }.encode(), raw);
    }

    #[test]
    fn test_parse_encapsulation_layout() {
        let mut raw = vec![0x98, 0xc1];
        raw.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        raw.extend_from_slice(&[0xaa, 0xbb, 0xcc]);
        raw.push(0x5e);
        raw.extend_from_slice(&[9; 8]);

        let SecurityCommand::MessageEncapsulation(frame) = SecurityCommand::parse(&raw).unwrap() else {
            panic!("expected encapsulation");
        };
        assert!(frame.request_nonce);
        assert_eq!(frame.sender_nonce.as_bytes(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(frame.ciphertext, vec![0xaa, 0xbb, 0xcc]);
        assert_eq!(frame.receiver_nonce_id, 0x5e);
        assert_eq!(frame.mac, [9; 8]);
        assert_eq!(SecurityCommand::MessageEncapsulation(frame).encode(), raw);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            SecurityCommand::parse(&[0x98]).unwrap_err(),
            FrameError::TooShort {
                expected: 2,
                actual: 1
            }
        );
        assert_eq!(
            SecurityCommand::parse(&[0x25, 0x01]).unwrap_err(),
            FrameError::NotSecurityFrame(0x25)
        );
        assert_eq!(
            SecurityCommand::parse(&[0x98, 0x33]).unwrap_err(),
            FrameError::UnknownCommand(0x33)
        );
        assert!(matches!(
            SecurityCommand::parse(&[0x98, 0x81, 1, 2, 3]).unwrap_err(),
            FrameError::TooShort { .. }
        ));
        assert!(matches!(
            SecurityCommand::parse(&[0x98, 0x80, 1, 2]).unwrap_err(),
            FrameError::TooShort { .. }
        ));

        let mut oversized = vec![0x98, 0x81];
        oversized.extend_from_slice(&[0u8; 8 + 256 + 1 + 8]);
        assert_eq!(
            SecurityCommand::parse(&oversized).unwrap_err(),
            FrameError::InvalidField("ciphertext length")
        );
    }

    #[test]
    fn test_commands_supported_report_mark() {
        let raw = [0x98, 0x03, 0x00, 0x25, 0x26, 0xef, 0x20];
        let cmd = SecurityCommand::parse(&raw).unwrap();
        assert_eq!(
            cmd,
            SecurityCommand::CommandsSupportedReport {
                reports_to_follow: 0,
                supported: vec![0x25, 0x26],
                controlled: vec![0x20],
            }
        );
        assert_eq!(cmd.encode(), raw.to_vec());
    }

    #[test]
    fn test_network_key_set() {
        let mut raw = vec![0x98, 0x06];
        raw.extend_from_slice(&[0x11; 16]);
        let cmd = SecurityCommand::parse(&raw).unwrap();
        assert_eq!(
            cmd,
            SecurityCommand::NetworkKeySet {
                key: NetworkKey::new([0x11; 16])
            }
        );
        assert_eq!(cmd.name(), "NetworkKeySet");
    }

    #[test]
    fn test_sequence_info() {
        let info = SequenceInfo::from_byte(0x3a);
        assert_eq!(info.counter, 0x0a);
        assert!(info.sequenced);
        assert!(info.second_frame);
        assert_eq!(info.to_byte(), 0x3a);
        assert_eq!(SequenceInfo::SINGLE.to_byte(), 0x00);
    }
}
