//! Contract event schemas and receipt log normalization.
//!
//! Providers hand back receipt logs in one of two shapes: already parsed
//! against the contract interface, or as raw `topics`/`data`. Both are
//! normalized into a [`DecodedEvent`] before any field is read, so callers
//! never probe the shape themselves.

use alloy_primitives::{
    Address,
    B256,
    Bytes,
    U256,
    keccak256,
};
use serde::{
    Deserialize,
    Serialize,
};

const WORD: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbiType {
    Address,
    Bool,
    Uint256,
}

impl AbiType {
    pub fn canonical(&self) -> &'static str {
        match self {
            AbiType::Address => "address",
            AbiType::Bool => "bool",
            AbiType::Uint256 => "uint256",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum AbiValue {
    Address(Address),
    Bool(bool),
    Uint(U256),
}

impl AbiValue {
    pub fn abi_type(&self) -> AbiType {
        match self {
            AbiValue::Address(_) => AbiType::Address,
            AbiValue::Bool(_) => AbiType::Bool,
            AbiValue::Uint(_) => AbiType::Uint256,
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match self {
            AbiValue::Address(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AbiValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<U256> {
        match self {
            AbiValue::Uint(u) => Some(*u),
            _ => None,
        }
    }

    fn encode_word(&self) -> [u8; WORD] {
        match self {
            AbiValue::Address(address) => {
                let mut word = [0u8; WORD];
                word[12..].copy_from_slice(address.as_slice());
                word
            }
            AbiValue::Bool(flag) => U256::from(*flag as u8).to_be_bytes::<WORD>(),
            AbiValue::Uint(value) => value.to_be_bytes::<WORD>(),
        }
    }

    fn decode_word(ty: AbiType, word: &[u8]) -> Result<Self, DecodeError> {
        match ty {
            AbiType::Address => {
                if word[..12].iter().any(|b| *b != 0) {
                    return Err(DecodeError::MalformedData(
                        "address word has dirty high bytes".to_string(),
                    ));
                }
                Ok(AbiValue::Address(Address::from_slice(&word[12..])))
            }
            AbiType::Bool => {
                if word[..WORD - 1].iter().any(|b| *b != 0) || word[WORD - 1] > 1 {
                    return Err(DecodeError::MalformedData(
                        "bool word is not 0 or 1".to_string(),
                    ));
                }
                Ok(AbiValue::Bool(word[WORD - 1] == 1))
            }
            AbiType::Uint256 => Ok(AbiValue::Uint(U256::from_be_slice(word))),
        }
    }
}

/// A non-indexed contract event.
#[derive(Debug, PartialEq, Eq)]
pub struct EventSchema {
    pub name: &'static str,
    pub params: &'static [(&'static str, AbiType)],
}

pub const FLIP_RESULT: EventSchema = EventSchema {
    name: "FlipResult",
    params: &[
        ("player", AbiType::Address),
        ("win", AbiType::Bool),
        ("betAmount", AbiType::Uint256),
        ("payout", AbiType::Uint256),
    ],
};

pub const WITHDRAWN: EventSchema = EventSchema {
    name: "Withdrawn",
    params: &[("owner", AbiType::Address), ("amount", AbiType::Uint256)],
};

pub static KNOWN_EVENTS: [&EventSchema; 2] = [&FLIP_RESULT, &WITHDRAWN];

impl EventSchema {
    /// Canonical signature, e.g. `FlipResult(address,bool,uint256,uint256)`.
    pub fn signature(&self) -> String {
        let params: Vec<&str> = self.params.iter().map(|(_, ty)| ty.canonical()).collect();
        format!("{}({})", self.name, params.join(","))
    }

    pub fn topic(&self) -> B256 {
        keccak256(self.signature().as_bytes())
    }

    fn check_args(&self, args: &[AbiValue]) -> Result<(), DecodeError> {
        if args.len() != self.params.len() {
            return Err(DecodeError::ArgumentMismatch {
                event: self.name,
                index: args.len().min(self.params.len()),
            });
        }
        for (index, (arg, (_, ty))) in args.iter().zip(self.params).enumerate() {
            if arg.abi_type() != *ty {
                return Err(DecodeError::ArgumentMismatch {
                    event: self.name,
                    index,
                });
            }
        }
        Ok(())
    }

    pub fn encode_data(&self, args: &[AbiValue]) -> Result<Bytes, DecodeError> {
        self.check_args(args)?;
        let mut data = Vec::with_capacity(args.len() * WORD);
        for arg in args {
            data.extend_from_slice(&arg.encode_word());
        }
        Ok(Bytes::from(data))
    }

    fn decode_data(&self, data: &[u8]) -> Result<Vec<AbiValue>, DecodeError> {
        let expected = self.params.len() * WORD;
        if data.len() != expected {
            return Err(DecodeError::MalformedData(format!(
                "{} expects {} data bytes, got {}",
                self.name,
                expected,
                data.len()
            )));
        }
        data.chunks_exact(WORD)
            .zip(self.params)
            .map(|(word, (_, ty))| AbiValue::decode_word(*ty, word))
            .collect()
    }

    /// Builds the raw `topics`/`data` form a JSON-RPC provider would return.
    pub fn raw_log(&self, address: Address, args: &[AbiValue]) -> Result<ReceiptLog, DecodeError> {
        Ok(ReceiptLog::Raw(RawLog {
            address,
            topics: vec![self.topic()],
            data: self.encode_data(args)?,
        }))
    }

    /// Builds the structured form some providers return.
    pub fn parsed_log(&self, args: &[AbiValue]) -> Result<ReceiptLog, DecodeError> {
        self.check_args(args)?;
        Ok(ReceiptLog::Parsed(ParsedLog {
            event: self.name.to_string(),
            args: args.to_vec(),
        }))
    }

    fn by_name(name: &str) -> Option<&'static EventSchema> {
        KNOWN_EVENTS.iter().copied().find(|s| s.name == name)
    }

    fn by_topic(topic: &B256) -> Option<&'static EventSchema> {
        KNOWN_EVENTS.iter().copied().find(|s| s.topic() == *topic)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedLog {
    pub event: String,
    pub args: Vec<AbiValue>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    #[serde(default)]
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// A receipt log as delivered by a provider. Deserialization tries the
/// parsed shape, then the raw shape, and keeps anything else as-is.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReceiptLog {
    Parsed(ParsedLog),
    Raw(RawLog),
    Unrecognized(serde_json::Value),
}

/// Shape-independent view of a log, checked against its schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedEvent {
    pub schema: &'static EventSchema,
    pub args: Vec<AbiValue>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("receipt contains no logs")]
    MissingLog,
    #[error("log has neither a parsed nor a raw shape")]
    UnrecognizedShape,
    #[error("unknown event {0}")]
    UnknownEvent(String),
    #[error("expected {expected} event, found {found}")]
    UnexpectedEvent {
        expected: &'static str,
        found: &'static str,
    },
    #[error("malformed log data: {0}")]
    MalformedData(String),
    #[error("argument {index} of {event} does not match the event schema")]
    ArgumentMismatch { event: &'static str, index: usize },
}

pub fn normalize(log: &ReceiptLog) -> Result<DecodedEvent, DecodeError> {
    match log {
        ReceiptLog::Parsed(parsed) => {
            let schema = EventSchema::by_name(&parsed.event)
                .ok_or_else(|| DecodeError::UnknownEvent(parsed.event.clone()))?;
            schema.check_args(&parsed.args)?;
            Ok(DecodedEvent {
                schema,
                args: parsed.args.clone(),
            })
        }
        ReceiptLog::Raw(raw) => {
            let (topic, rest) = raw
                .topics
                .split_first()
                .ok_or_else(|| DecodeError::MalformedData("log has no topics".to_string()))?;
            let schema = EventSchema::by_topic(topic)
                .ok_or_else(|| DecodeError::UnknownEvent(topic.to_string()))?;
            if !rest.is_empty() {
                return Err(DecodeError::MalformedData(format!(
                    "{} has no indexed parameters but log carries {} extra topics",
                    schema.name,
                    rest.len()
                )));
            }
            Ok(DecodedEvent {
                schema,
                args: schema.decode_data(&raw.data)?,
            })
        }
        ReceiptLog::Unrecognized(_) => Err(DecodeError::UnrecognizedShape),
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use serde_json::json;

    fn player() -> Address {
        Address::repeat_byte(0x11)
    }

    fn flip_args(win: bool, payout: u64) -> Vec<AbiValue> {
        vec![
            AbiValue::Address(player()),
            AbiValue::Bool(win),
            AbiValue::Uint(U256::from(1_000u64)),
            AbiValue::Uint(U256::from(payout)),
        ]
    }

    #[test]
    fn signature__matches_solidity_canonical_form() {
        assert_eq!(
            FLIP_RESULT.signature(),
            "FlipResult(address,bool,uint256,uint256)"
        );
        assert_eq!(WITHDRAWN.signature(), "Withdrawn(address,uint256)");
        assert_eq!(FLIP_RESULT.topic(), keccak256(b"FlipResult(address,bool,uint256,uint256)"));
    }

    #[test]
    fn normalize__raw_and_parsed_shapes_agree() {
        // given
        let args = flip_args(true, 1_950);
        let raw = FLIP_RESULT.raw_log(Address::ZERO, &args).unwrap();
        let parsed = FLIP_RESULT.parsed_log(&args).unwrap();

        // when
        let from_raw = normalize(&raw).unwrap();
        let from_parsed = normalize(&parsed).unwrap();

        // then
        assert_eq!(from_raw, from_parsed);
        assert_eq!(from_raw.schema, &FLIP_RESULT);
        assert_eq!(from_raw.args, args);
    }

    #[test]
    fn normalize__raw_log_without_topics_is_malformed() {
        let log = ReceiptLog::Raw(RawLog {
            address: Address::ZERO,
            topics: vec![],
            data: Bytes::new(),
        });
        assert!(matches!(normalize(&log), Err(DecodeError::MalformedData(_))));
    }

    #[test]
    fn normalize__truncated_data_is_malformed() {
        // given
        let ReceiptLog::Raw(mut raw) = FLIP_RESULT.raw_log(Address::ZERO, &flip_args(false, 0)).unwrap()
        else {
            panic!("expected raw log");
        };
        raw.data = Bytes::from(raw.data[..96].to_vec());

        // when
        let result = normalize(&ReceiptLog::Raw(raw));

        // then
        assert!(matches!(result, Err(DecodeError::MalformedData(_))));
    }

    #[test]
    fn normalize__non_canonical_bool_is_malformed() {
        // given
        let ReceiptLog::Raw(raw) = FLIP_RESULT.raw_log(Address::ZERO, &flip_args(true, 1)).unwrap()
        else {
            panic!("expected raw log");
        };
        let mut data = raw.data.to_vec();
        data[2 * 32 - 1] = 2;

        // when
        let result = normalize(&ReceiptLog::Raw(RawLog {
            data: Bytes::from(data),
            ..raw
        }));

        // then
        assert!(matches!(result, Err(DecodeError::MalformedData(_))));
    }

    #[test]
    fn normalize__unknown_topic_is_rejected() {
        let log = ReceiptLog::Raw(RawLog {
            address: Address::ZERO,
            topics: vec![keccak256(b"Transfer(address,address,uint256)")],
            data: Bytes::new(),
        });
        assert!(matches!(normalize(&log), Err(DecodeError::UnknownEvent(_))));
    }

    #[test]
    fn normalize__parsed_log_with_wrong_argument_types_is_rejected() {
        let log = ReceiptLog::Parsed(ParsedLog {
            event: "FlipResult".to_string(),
            args: vec![
                AbiValue::Address(player()),
                AbiValue::Uint(U256::from(1u64)),
                AbiValue::Uint(U256::from(1u64)),
                AbiValue::Uint(U256::from(1u64)),
            ],
        });
        assert_eq!(
            normalize(&log),
            Err(DecodeError::ArgumentMismatch {
                event: "FlipResult",
                index: 1
            })
        );
    }

    #[test]
    fn receipt_log__provider_json_is_classified_by_shape() {
        // given
        let topic = FLIP_RESULT.topic();
        let data = FLIP_RESULT.encode_data(&flip_args(false, 0)).unwrap();
        let raw_json = json!({
            "address": "0x80197d71018fa03af7b095a96e9179c28f87c96c",
            "topics": [topic],
            "data": data,
            "blockNumber": "0x10",
            "logIndex": "0x0",
        });
        let parsed_json = json!({
            "event": "Withdrawn",
            "args": [
                { "type": "address", "value": "0x1111111111111111111111111111111111111111" },
                { "type": "uint", "value": "0x64" },
            ],
        });
        let junk_json = json!({ "foo": 1 });

        // when
        let raw: ReceiptLog = serde_json::from_value(raw_json).unwrap();
        let parsed: ReceiptLog = serde_json::from_value(parsed_json).unwrap();
        let junk: ReceiptLog = serde_json::from_value(junk_json).unwrap();

        // then
        assert!(matches!(raw, ReceiptLog::Raw(_)));
        assert_eq!(normalize(&raw).unwrap().schema, &FLIP_RESULT);
        assert!(matches!(parsed, ReceiptLog::Parsed(_)));
        assert_eq!(
            normalize(&parsed).unwrap().args[1],
            AbiValue::Uint(U256::from(100u64))
        );
        assert_eq!(normalize(&junk), Err(DecodeError::UnrecognizedShape));
    }
}
