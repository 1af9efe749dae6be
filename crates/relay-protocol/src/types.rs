//! Identity, position, and message tag constants.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Number;

/// All message `type` tags understood by the relay.
pub struct MessageTypes;

impl MessageTypes {
    pub const PLAYER_JOIN: &str = "playerJoin";
    pub const PLAYER_MOVE: &str = "playerMove";
    pub const PLAYER_LEAVE: &str = "playerLeave";

    pub const ALL: [&str; 3] = [Self::PLAYER_JOIN, Self::PLAYER_MOVE, Self::PLAYER_LEAVE];

    pub fn is_known(tag: &str) -> bool {
        Self::ALL.contains(&tag)
    }
}

/// Client-supplied participant name.
///
/// Opaque to the server: it is never validated beyond being a string, and two
/// clients announcing the same identity collide with last-write-wins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for Identity {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl PartialEq<str> for Identity {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Identity {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// An `[x, y, z]` coordinate triple.
///
/// Coordinates are kept as JSON numbers so a position is forwarded exactly as
/// the client wrote it (`[1, 2, 3]` stays integral, `[0.5, 0, 1e3]` keeps its
/// floats). The relay never does arithmetic on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(pub [Number; 3]);

impl Position {
    pub fn origin() -> Self {
        Self([Number::from(0_i64), Number::from(0_i64), Number::from(0_i64)])
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::origin()
    }
}

impl From<[i64; 3]> for Position {
    fn from(coords: [i64; 3]) -> Self {
        let [x, y, z] = coords;
        Self([Number::from(x), Number::from(y), Number::from(z)])
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x, y, z] = &self.0;
        write!(f, "[{x}, {y}, {z}]")
    }
}
