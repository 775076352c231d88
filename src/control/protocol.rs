//-
// Copyright (c) 2020, the ocmigrate authors
//
// This file is part of ocmigrate.
//
// Ocmigrate is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Ocmigrate is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// ocmigrate. If not, see <http://www.gnu.org/licenses/>.

//! The JSON control protocol.
//!
//! A request is an object carrying an integer `command` plus
//! command-specific arguments; decoding validates every required field up
//! front and produces one `Request` variant per command, so handlers never
//! poke at raw JSON. A response is an object carrying an integer `code`
//! (0 success, 1 failure) plus an `error` string on failure or payload
//! fields on success.
//!
//! The decode error strings (`Missing <field> key` and friends) are part of
//! the operator-visible contract and are matched by existing tooling.

use std::fmt::Display;

use serde::Serialize;
use serde_json::{json, Map, Value};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// The wire command numbers.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr,
)]
#[repr(u8)]
pub enum CommandCode {
    Status = 1,
    Exit = 2,
    Cancel = 3,
    Connect = 4,
    GetUsers = 5,
    SetUsers = 6,
    Estimate = 7,
    Export = 8,
    Import = 9,
}

impl CommandCode {
    fn from_raw(raw: i64) -> Option<Self> {
        use self::CommandCode::*;
        match raw {
            1 => Some(Status),
            2 => Some(Exit),
            3 => Some(Cancel),
            4 => Some(Connect),
            5 => Some(GetUsers),
            6 => Some(SetUsers),
            7 => Some(Estimate),
            8 => Some(Export),
            9 => Some(Import),
            _ => None,
        }
    }
}

/// A fully validated request.
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    Status,
    Exit,
    Cancel,
    Connect(ConnectParams),
    GetUsers,
    SetUsers(Vec<String>),
    Estimate(Vec<String>),
    Export,
    Import,
    /// Syntactically valid envelope with a command number we don't know.
    Unknown(i64),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConnectParams {
    pub remote: Credentials,
    pub local: Credentials,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub address: String,
}

/// Decode a raw request. The error string is ready to be sent back in a
/// failure response.
pub fn decode(raw: &[u8]) -> Result<Request, String> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|_| "Error parsing JSON request".to_owned())?;
    let object = value
        .as_object()
        .ok_or_else(|| "Error parsing JSON request".to_owned())?;
    let command = object
        .get("command")
        .and_then(Value::as_i64)
        .ok_or_else(|| "Missing command key".to_owned())?;

    let code = match CommandCode::from_raw(command) {
        Some(code) => code,
        None => return Ok(Request::Unknown(command)),
    };
    Ok(match code {
        CommandCode::Status => Request::Status,
        CommandCode::Exit => Request::Exit,
        CommandCode::Cancel => Request::Cancel,
        CommandCode::Connect => Request::Connect(ConnectParams {
            remote: credentials(object, "remote")?,
            local: credentials(object, "local")?,
        }),
        CommandCode::GetUsers => Request::GetUsers,
        CommandCode::SetUsers => Request::SetUsers(users(object)?),
        CommandCode::Estimate => Request::Estimate(users(object)?),
        CommandCode::Export => Request::Export,
        CommandCode::Import => Request::Import,
    })
}

fn require_str(
    object: &Map<String, Value>,
    key: &str,
) -> Result<String, String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| format!("Missing {} key", key))
}

fn credentials(
    object: &Map<String, Value>,
    key: &str,
) -> Result<Credentials, String> {
    let side = object
        .get(key)
        .and_then(Value::as_object)
        .ok_or_else(|| format!("Missing {} key", key))?;
    Ok(Credentials {
        username: require_str(side, "username")?,
        password: require_str(side, "password")?,
        address: require_str(side, "address")?,
    })
}

fn users(object: &Map<String, Value>) -> Result<Vec<String>, String> {
    let users = object
        .get("users")
        .and_then(Value::as_array)
        .ok_or_else(|| "Missing users key".to_owned())?;
    if users.is_empty() {
        return Err("Empty users list".to_owned());
    }
    users
        .iter()
        .map(|entry| {
            entry
                .as_object()
                .and_then(|e| e.get("name"))
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or_else(|| "Missing name entry".to_owned())
        })
        .collect()
}

fn render(value: &Value) -> Vec<u8> {
    value.to_string().into_bytes()
}

/// `{"code":0}`
pub fn ok() -> Vec<u8> {
    render(&json!({ "code": 0 }))
}

/// `{"code":1}`
pub fn failure() -> Vec<u8> {
    render(&json!({ "code": 1 }))
}

/// `{"code":1,"error":...}`
pub fn error(message: impl Display) -> Vec<u8> {
    render(&json!({ "code": 1, "error": message.to_string() }))
}

/// Success response carrying `value`'s fields next to `"code":0`.
pub fn payload(value: impl Serialize) -> Vec<u8> {
    match serde_json::to_value(value) {
        Ok(Value::Object(mut object)) => {
            object.insert("code".to_owned(), json!(0));
            render(&Value::Object(object))
        }
        // A non-object payload would be a programming error; report it
        // rather than emit invalid framing.
        _ => error("Internal error rendering response"),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decode_plain_commands() {
        assert_eq!(Ok(Request::Status), decode(br#"{"command":1}"#));
        assert_eq!(Ok(Request::Exit), decode(br#"{"command":2}"#));
        assert_eq!(Ok(Request::Cancel), decode(br#"{"command":3}"#));
        assert_eq!(Ok(Request::GetUsers), decode(br#"{"command":5}"#));
        assert_eq!(Ok(Request::Export), decode(br#"{"command":8}"#));
        assert_eq!(Ok(Request::Import), decode(br#"{"command":9}"#));
        assert_eq!(Ok(Request::Unknown(42)), decode(br#"{"command":42}"#));
    }

    #[test]
    fn decode_parse_failures() {
        assert_eq!(
            Err("Error parsing JSON request".to_owned()),
            decode(b"")
        );
        assert_eq!(
            Err("Error parsing JSON request".to_owned()),
            decode(b"{\"command\":")
        );
        assert_eq!(
            Err("Error parsing JSON request".to_owned()),
            decode(b"[1,2,3]")
        );
        assert_eq!(Err("Missing command key".to_owned()), decode(b"{}"));
        assert_eq!(
            Err("Missing command key".to_owned()),
            decode(br#"{"command":"status"}"#)
        );
    }

    #[test]
    fn decode_connect() {
        let raw = br#"{
            "command": 4,
            "remote": {
                "username": "alice",
                "password": "secret",
                "address": "mail.example.com"
            },
            "local": {
                "username": "alice",
                "password": "secret",
                "address": "openchange.example.com"
            }
        }"#;
        match decode(raw).unwrap() {
            Request::Connect(params) => {
                assert_eq!("alice", params.remote.username);
                assert_eq!("mail.example.com", params.remote.address);
                assert_eq!("openchange.example.com", params.local.address);
            }
            r => panic!("unexpected request: {:?}", r),
        }

        assert_eq!(
            Err("Missing remote key".to_owned()),
            decode(br#"{"command":4}"#)
        );
        assert_eq!(
            Err("Missing local key".to_owned()),
            decode(
                br#"{"command":4,"remote":{"username":"a","password":"b",
                     "address":"c"}}"#
            )
        );
        assert_eq!(
            Err("Missing password key".to_owned()),
            decode(
                br#"{"command":4,"remote":{"username":"a","address":"c"}}"#
            )
        );
    }

    #[test]
    fn decode_user_lists() {
        assert_eq!(
            Ok(Request::Estimate(vec![
                "alice".to_owned(),
                "bob".to_owned()
            ])),
            decode(
                br#"{"command":7,"users":[{"name":"alice"},{"name":"bob"}]}"#
            )
        );
        assert_eq!(
            Ok(Request::SetUsers(vec!["carol".to_owned()])),
            decode(br#"{"command":6,"users":[{"name":"carol"}]}"#)
        );
        assert_eq!(
            Err("Missing users key".to_owned()),
            decode(br#"{"command":7}"#)
        );
        assert_eq!(
            Err("Empty users list".to_owned()),
            decode(br#"{"command":7,"users":[]}"#)
        );
        assert_eq!(
            Err("Missing name entry".to_owned()),
            decode(br#"{"command":7,"users":[{"name":"a"},{}]}"#)
        );
        assert_eq!(
            Err("Missing name entry".to_owned()),
            decode(br#"{"command":7,"users":["alice"]}"#)
        );
    }

    #[test]
    fn response_builders() {
        assert_eq!(br#"{"code":0}"#.to_vec(), ok());
        assert_eq!(br#"{"code":1}"#.to_vec(), failure());

        let e: Value = serde_json::from_slice(&error("boom")).unwrap();
        assert_eq!(json!({"code": 1, "error": "boom"}), e);

        #[derive(Serialize)]
        struct P {
            count: u32,
        }
        let p: Value = serde_json::from_slice(&payload(P { count: 3 })).unwrap();
        assert_eq!(json!({"code": 0, "count": 3}), p);
    }
}
