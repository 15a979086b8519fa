//! Line-oriented wire protocol between customer groups and the broker.
//!
//! ```text
//! inbound:  <reply-channel-id>:<VERB> <arg1> <arg2>\n
//! reply:    <VERB> <arg1> <arg2>\n
//! ```
//!
//! | Verb            | arg1         | arg2          |
//! |-----------------|--------------|---------------|
//! | `REQUEST_SEAT`  | group_size   | customer_id   |
//! | `SEATED`        | group_size   | table_id      |
//! | `REJECTED`      | group_size   | customer_id   |
//! | `LEAVE`         | group_size   | customer_id   |
//! | `CUSTOMER_DONE` | group_size   | table_id      |
//!
//! Records are decoded once, here, into [`Message`]; everything past the
//! channel boundary matches on the enum.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use venue_env::{ChannelId, CustomerId, TableId};

/// Reasons a record cannot be decoded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty record")]
    Empty,

    #[error("record has no reply address: {0:?}")]
    MissingAddress(String),

    #[error("unknown verb {0:?}")]
    UnknownVerb(String),

    #[error("{verb} expects {expected} arguments, got {found}")]
    FieldCount {
        verb: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("{field} is not a number: {value:?}")]
    BadNumber { field: &'static str, value: String },
}

/// One protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    RequestSeat { group_size: u32, customer_id: CustomerId },
    Seated { group_size: u32, table_id: TableId },
    Rejected { group_size: u32, customer_id: CustomerId },
    Leave { group_size: u32, customer_id: CustomerId },
    CustomerDone { group_size: u32, table_id: TableId },
}

const ARGS_PER_VERB: usize = 2;

impl Message {
    /// The wire verb.
    pub fn verb(&self) -> &'static str {
        let verb = match self {
            Message::RequestSeat { .. } => Verb::RequestSeat,
            Message::Seated { .. } => Verb::Seated,
            Message::Rejected { .. } => Verb::Rejected,
            Message::Leave { .. } => Verb::Leave,
            Message::CustomerDone { .. } => Verb::CustomerDone,
        };
        verb.as_str()
    }

    /// The group size every message carries.
    pub fn group_size(&self) -> u32 {
        match *self {
            Message::RequestSeat { group_size, .. }
            | Message::Seated { group_size, .. }
            | Message::Rejected { group_size, .. }
            | Message::Leave { group_size, .. }
            | Message::CustomerDone { group_size, .. } => group_size,
        }
    }

    /// Encodes as a newline-terminated reply record.
    pub fn encode(&self) -> String {
        format!("{}\n", self)
    }

    /// Decodes a reply record (trailing newline optional).
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let mut tokens = line.split_whitespace();
        let token = tokens.next().ok_or(ProtocolError::Empty)?;
        let verb = Verb::from_token(token)
            .ok_or_else(|| ProtocolError::UnknownVerb(token.to_string()))?;
        let args: Vec<&str> = tokens.collect();

        if args.len() != ARGS_PER_VERB {
            return Err(ProtocolError::FieldCount {
                verb: verb.as_str(),
                expected: ARGS_PER_VERB,
                found: args.len(),
            });
        }

        let group_size = parse_number("group_size", args[0])?;
        let message = match verb {
            Verb::RequestSeat => Message::RequestSeat {
                group_size,
                customer_id: CustomerId(parse_number("customer_id", args[1])?),
            },
            Verb::Seated => Message::Seated {
                group_size,
                table_id: TableId(parse_number("table_id", args[1])?),
            },
            Verb::Rejected => Message::Rejected {
                group_size,
                customer_id: CustomerId(parse_number("customer_id", args[1])?),
            },
            Verb::Leave => Message::Leave {
                group_size,
                customer_id: CustomerId(parse_number("customer_id", args[1])?),
            },
            Verb::CustomerDone => Message::CustomerDone {
                group_size,
                table_id: TableId(parse_number("table_id", args[1])?),
            },
        };
        Ok(message)
    }
}

#[derive(Debug, Clone, Copy)]
enum Verb {
    RequestSeat,
    Seated,
    Rejected,
    Leave,
    CustomerDone,
}

impl Verb {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "REQUEST_SEAT" => Some(Verb::RequestSeat),
            "SEATED" => Some(Verb::Seated),
            "REJECTED" => Some(Verb::Rejected),
            "LEAVE" => Some(Verb::Leave),
            "CUSTOMER_DONE" => Some(Verb::CustomerDone),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Verb::RequestSeat => "REQUEST_SEAT",
            Verb::Seated => "SEATED",
            Verb::Rejected => "REJECTED",
            Verb::Leave => "LEAVE",
            Verb::CustomerDone => "CUSTOMER_DONE",
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Message::RequestSeat { group_size, customer_id }
            | Message::Rejected { group_size, customer_id }
            | Message::Leave { group_size, customer_id } => {
                write!(f, "{} {} {}", self.verb(), group_size, customer_id)
            }
            Message::Seated { group_size, table_id }
            | Message::CustomerDone { group_size, table_id } => {
                write!(f, "{} {} {}", self.verb(), group_size, table_id)
            }
        }
    }
}

fn parse_number<T: FromStr>(field: &'static str, value: &str) -> Result<T, ProtocolError> {
    value.parse().map_err(|_| ProtocolError::BadNumber {
        field,
        value: value.to_string(),
    })
}

/// An inbound record: a message plus the sender's reply address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub reply_to: ChannelId,
    pub message: Message,
}

impl Envelope {
    pub fn new(reply_to: ChannelId, message: Message) -> Self {
        Self { reply_to, message }
    }

    /// Encodes as a newline-terminated inbound record.
    pub fn encode(&self) -> String {
        format!("{}:{}\n", self.reply_to, self.message)
    }

    /// Decodes an inbound record (trailing newline optional).
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }

        let (address, body) = line
            .split_once(':')
            .ok_or_else(|| ProtocolError::MissingAddress(line.to_string()))?;
        let address = address.trim();
        if address.is_empty() {
            return Err(ProtocolError::MissingAddress(line.to_string()));
        }

        Ok(Self {
            reply_to: ChannelId::new(address),
            message: Message::decode(body)?,
        })
    }
}
