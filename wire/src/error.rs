// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Codec failures and the OpenFlow error-message taxonomy.
//!
//! [`WireError`] is what parsers return locally; [`ErrorKind`] is the typed
//! (type, code) pair carried by `OFPT_ERROR` messages on the wire. Incoming
//! malformed bytes are reported to the peer by mapping the former onto the
//! latter with [`WireError::to_error_kind`].

/// Error produced while decoding OpenFlow bytes.
///
/// Builders never produce these; a failure to *encode* is a programming
/// error and is kept unreachable by construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("truncated {what}: need {needed} bytes, got {got}")]
    Truncated {
        what: &'static str,
        needed: usize,
        got: usize,
    },
    #[error("message length field {length} is shorter than the header")]
    BadMsgLength { length: u16 },
    #[error("unknown message type {0}")]
    UnknownMsgType(u8),
    #[error("unsupported protocol version {0:#04x}")]
    UnsupportedVersion(u8),
    #[error("ofp_match type {0} is not OXM")]
    BadMatchType(u16),
    #[error("unknown OpenFlow-basic OXM field {0}")]
    UnknownOxmField(u8),
    #[error("duplicate OpenFlow-basic OXM field {0}")]
    DuplicateOxmField(u8),
    #[error("OXM field {field} has payload length {got}, expected {expected}")]
    BadOxmLength {
        field: u8,
        expected: usize,
        got: usize,
    },
    #[error("unknown action type {0}")]
    UnknownAction(u16),
    #[error("action length {len} invalid for action type {action}")]
    BadActionLength { action: u16, len: u16 },
    #[error("unknown instruction type {0}")]
    UnknownInstruction(u16),
    #[error("instruction length {len} invalid for instruction type {instruction}")]
    BadInstructionLength { instruction: u16, len: u16 },
    #[error("unknown multipart type {0}")]
    UnknownMultipartType(u16),
    #[error("unknown group command {0}")]
    UnknownGroupCommand(u16),
    #[error("unknown flow-mod command {0}")]
    UnknownFlowModCommand(u8),
    #[error("{what} has {got} trailing bytes")]
    TrailingBytes { what: &'static str, got: usize },
}

impl WireError {
    /// Map a decode failure onto the error message sent back to the peer.
    #[must_use]
    pub fn to_error_kind(&self) -> ErrorKind {
        use WireError::*;
        match self {
            UnsupportedVersion(_) => ErrorKind::HelloFailed(HelloFailedCode::Incompatible),
            UnknownMsgType(_) => ErrorKind::BadRequest(BadRequestCode::BadType),
            UnknownMultipartType(_) => ErrorKind::BadRequest(BadRequestCode::BadMultipart),
            BadMatchType(_) => ErrorKind::BadMatch(BadMatchCode::BadType),
            UnknownOxmField(_) => ErrorKind::BadMatch(BadMatchCode::BadField),
            DuplicateOxmField(_) => ErrorKind::BadMatch(BadMatchCode::DupField),
            BadOxmLength { .. } => ErrorKind::BadMatch(BadMatchCode::BadLen),
            UnknownAction(_) => ErrorKind::BadAction(BadActionCode::BadType),
            BadActionLength { .. } => ErrorKind::BadAction(BadActionCode::BadLen),
            UnknownInstruction(_) => {
                ErrorKind::BadInstruction(BadInstructionCode::UnknownInst)
            }
            BadInstructionLength { .. } => {
                ErrorKind::BadInstruction(BadInstructionCode::BadLen)
            }
            UnknownFlowModCommand(_) => {
                ErrorKind::FlowModFailed(FlowModFailedCode::BadCommand)
            }
            UnknownGroupCommand(_) => {
                ErrorKind::GroupModFailed(GroupModFailedCode::BadCommand)
            }
            Truncated { .. } | BadMsgLength { .. } | TrailingBytes { .. } => {
                ErrorKind::BadRequest(BadRequestCode::BadLen)
            }
        }
    }
}

macro_rules! error_code_enum {
    ($(#[$doc:meta])* $name:ident { $($variant:ident = $value:expr),+ $(,)? }) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u16)]
        pub enum $name {
            $($variant = $value),+
        }

        impl $name {
            pub(crate) fn from_wire(raw: u16) -> Option<$name> {
                match raw {
                    $($value => Some($name::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

error_code_enum! {
    /// `OFPET_HELLO_FAILED` codes.
    HelloFailedCode {
        Incompatible = 0,
        EPerm = 1,
    }
}

error_code_enum! {
    /// `OFPET_BAD_REQUEST` codes.
    BadRequestCode {
        BadVersion = 0,
        BadType = 1,
        BadMultipart = 2,
        BadExperimenter = 3,
        BadExpType = 4,
        EPerm = 5,
        BadLen = 6,
        BufferEmpty = 7,
        BufferUnknown = 8,
        BadTableId = 9,
        IsSlave = 10,
        BadPort = 11,
        BadPacket = 12,
        MultipartBufferOverflow = 13,
    }
}

error_code_enum! {
    /// `OFPET_BAD_ACTION` codes.
    BadActionCode {
        BadType = 0,
        BadLen = 1,
        BadExperimenter = 2,
        BadExpType = 3,
        BadOutPort = 4,
        BadArgument = 5,
        EPerm = 6,
        TooMany = 7,
        BadQueue = 8,
        BadOutGroup = 9,
        MatchInconsistent = 10,
        UnsupportedOrder = 11,
        BadTag = 12,
        BadSetType = 13,
        BadSetLen = 14,
        BadSetArgument = 15,
    }
}

error_code_enum! {
    /// `OFPET_BAD_INSTRUCTION` codes.
    BadInstructionCode {
        UnknownInst = 0,
        UnsupInst = 1,
        BadTableId = 2,
        UnsupMetadata = 3,
        UnsupMetadataMask = 4,
        BadExperimenter = 5,
        BadExpType = 6,
        BadLen = 7,
        EPerm = 8,
    }
}

error_code_enum! {
    /// `OFPET_BAD_MATCH` codes.
    BadMatchCode {
        BadType = 0,
        BadLen = 1,
        BadTag = 2,
        BadDlAddrMask = 3,
        BadNwAddrMask = 4,
        BadWildcards = 5,
        BadField = 6,
        BadValue = 7,
        BadMask = 8,
        BadPrereq = 9,
        DupField = 10,
        EPerm = 11,
    }
}

error_code_enum! {
    /// `OFPET_FLOW_MOD_FAILED` codes.
    FlowModFailedCode {
        Unknown = 0,
        TableFull = 1,
        BadTableId = 2,
        Overlap = 3,
        EPerm = 4,
        BadTimeout = 5,
        BadCommand = 6,
        BadFlags = 7,
    }
}

error_code_enum! {
    /// `OFPET_GROUP_MOD_FAILED` codes.
    GroupModFailedCode {
        GroupExists = 0,
        InvalidGroup = 1,
        WeightUnsupported = 2,
        OutOfGroups = 3,
        OutOfBuckets = 4,
        ChainingUnsupported = 5,
        WatchUnsupported = 6,
        Loop = 7,
        UnknownGroup = 8,
        ChainedGroup = 9,
        BadType = 10,
        BadCommand = 11,
        BadBucket = 12,
        BadWatch = 13,
        EPerm = 14,
    }
}

error_code_enum! {
    /// `OFPET_SWITCH_CONFIG_FAILED` codes.
    SwitchConfigFailedCode {
        BadFlags = 0,
        BadLen = 1,
        EPerm = 2,
    }
}

/// Typed (type, code) pair of an OpenFlow error message.
///
/// Error types whose codes this crate never originates are carried through
/// [`ErrorKind::Other`] so an incoming error is always representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    HelloFailed(HelloFailedCode),
    BadRequest(BadRequestCode),
    BadAction(BadActionCode),
    BadInstruction(BadInstructionCode),
    BadMatch(BadMatchCode),
    FlowModFailed(FlowModFailedCode),
    GroupModFailed(GroupModFailedCode),
    SwitchConfigFailed(SwitchConfigFailedCode),
    /// Any (type, code) pair not decoded into a typed variant: port-mod,
    /// table-mod, queue-op, role, meter, table-features and experimenter
    /// errors, and unknown codes of the typed families.
    Other { error_type: u16, code: u16 },
}

impl ErrorKind {
    /// Wire value of `ofp_error_msg.type`.
    #[must_use]
    pub fn error_type(&self) -> u16 {
        use ErrorKind::*;
        match self {
            HelloFailed(_) => 0,
            BadRequest(_) => 1,
            BadAction(_) => 2,
            BadInstruction(_) => 3,
            BadMatch(_) => 4,
            FlowModFailed(_) => 5,
            GroupModFailed(_) => 6,
            SwitchConfigFailed(_) => 10,
            Other { error_type, .. } => *error_type,
        }
    }

    /// Wire value of `ofp_error_msg.code`.
    #[must_use]
    pub fn code(&self) -> u16 {
        use ErrorKind::*;
        match self {
            HelloFailed(c) => *c as u16,
            BadRequest(c) => *c as u16,
            BadAction(c) => *c as u16,
            BadInstruction(c) => *c as u16,
            BadMatch(c) => *c as u16,
            FlowModFailed(c) => *c as u16,
            GroupModFailed(c) => *c as u16,
            SwitchConfigFailed(c) => *c as u16,
            Other { code, .. } => *code,
        }
    }

    /// Rebuild the typed pair from wire values.
    #[must_use]
    pub fn from_wire(error_type: u16, code: u16) -> ErrorKind {
        let typed = match error_type {
            0 => HelloFailedCode::from_wire(code).map(ErrorKind::HelloFailed),
            1 => BadRequestCode::from_wire(code).map(ErrorKind::BadRequest),
            2 => BadActionCode::from_wire(code).map(ErrorKind::BadAction),
            3 => BadInstructionCode::from_wire(code).map(ErrorKind::BadInstruction),
            4 => BadMatchCode::from_wire(code).map(ErrorKind::BadMatch),
            5 => FlowModFailedCode::from_wire(code).map(ErrorKind::FlowModFailed),
            6 => GroupModFailedCode::from_wire(code).map(ErrorKind::GroupModFailed),
            10 => SwitchConfigFailedCode::from_wire(code).map(ErrorKind::SwitchConfigFailed),
            _ => None,
        };
        typed.unwrap_or(ErrorKind::Other { error_type, code })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wire_values_roundtrip() {
        let kinds = [
            ErrorKind::HelloFailed(HelloFailedCode::Incompatible),
            ErrorKind::BadRequest(BadRequestCode::BadLen),
            ErrorKind::BadMatch(BadMatchCode::DupField),
            ErrorKind::FlowModFailed(FlowModFailedCode::Overlap),
            ErrorKind::GroupModFailed(GroupModFailedCode::UnknownGroup),
            ErrorKind::Other {
                error_type: 12,
                code: 3,
            },
        ];
        for kind in kinds {
            assert_eq!(
                ErrorKind::from_wire(kind.error_type(), kind.code()),
                kind
            );
        }
    }

    #[test]
    fn unknown_code_degrades_to_other() {
        assert_eq!(
            ErrorKind::from_wire(0, 99),
            ErrorKind::Other {
                error_type: 0,
                code: 99
            }
        );
    }

    #[test]
    fn decode_failures_map_to_peer_errors() {
        assert_eq!(
            WireError::UnknownMsgType(42).to_error_kind(),
            ErrorKind::BadRequest(BadRequestCode::BadType)
        );
        assert_eq!(
            WireError::DuplicateOxmField(3).to_error_kind(),
            ErrorKind::BadMatch(BadMatchCode::DupField)
        );
        assert_eq!(
            WireError::Truncated {
                what: "x",
                needed: 8,
                got: 1
            }
            .to_error_kind(),
            ErrorKind::BadRequest(BadRequestCode::BadLen)
        );
    }
}
