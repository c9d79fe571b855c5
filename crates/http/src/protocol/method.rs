//! Request methods and method masks used for route matching.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use http::Method;

use crate::protocol::ParseError;

/// A set of request methods, stored as a bit mask.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MethodSet(u16);

impl MethodSet {
    pub const NONE: Self = Self(0);
    pub const GET: Self = Self(0b0000_0000_0000_0001);
    pub const POST: Self = Self(0b0000_0000_0000_0010);
    pub const DELETE: Self = Self(0b0000_0000_0000_0100);
    pub const PUT: Self = Self(0b0000_0000_0000_1000);
    pub const PATCH: Self = Self(0b0000_0000_0001_0000);
    pub const HEAD: Self = Self(0b0000_0000_0010_0000);
    pub const OPTIONS: Self = Self(0b0000_0000_0100_0000);
    pub const PROPFIND: Self = Self(0b0000_0000_1000_0000);
    pub const LOCK: Self = Self(0b0000_0001_0000_0000);
    pub const UNLOCK: Self = Self(0b0000_0010_0000_0000);
    pub const PROPPATCH: Self = Self(0b0000_0100_0000_0000);
    pub const MKCOL: Self = Self(0b0000_1000_0000_0000);
    pub const MOVE: Self = Self(0b0001_0000_0000_0000);
    pub const COPY: Self = Self(0b0010_0000_0000_0000);
    pub const ANY: Self = Self(0b0111_1111_1111_1111);

    const NAMED: [(Self, &'static str); 14] = [
        (Self::GET, "GET"),
        (Self::POST, "POST"),
        (Self::DELETE, "DELETE"),
        (Self::PUT, "PUT"),
        (Self::PATCH, "PATCH"),
        (Self::HEAD, "HEAD"),
        (Self::OPTIONS, "OPTIONS"),
        (Self::PROPFIND, "PROPFIND"),
        (Self::LOCK, "LOCK"),
        (Self::UNLOCK, "UNLOCK"),
        (Self::PROPPATCH, "PROPPATCH"),
        (Self::MKCOL, "MKCOL"),
        (Self::MOVE, "MOVE"),
        (Self::COPY, "COPY"),
    ];

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    /// Whether the given request method is part of this set.
    pub fn matches(self, method: &Method) -> bool {
        self.contains(Self::from(method))
    }
}

impl From<&Method> for MethodSet {
    fn from(method: &Method) -> Self {
        Self::NAMED.iter().find(|(_, name)| *name == method.as_str()).map_or(Self::NONE, |(set, _)| *set)
    }
}

impl BitOr for MethodSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for MethodSet {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for MethodSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::ANY {
            return f.write_str("MethodSet(ANY)");
        }
        let names: Vec<&str> = Self::NAMED.iter().filter(|(set, _)| self.contains(*set)).map(|(_, name)| *name).collect();
        write!(f, "MethodSet({})", names.join("|"))
    }
}

/// Parses a request-line method token. Only the methods named by [`MethodSet`] are accepted.
pub fn parse_method(token: &str) -> Result<Method, ParseError> {
    if !MethodSet::NAMED.iter().any(|(_, name)| *name == token) {
        return Err(ParseError::invalid_method(token));
    }
    Method::from_bytes(token.as_bytes()).map_err(|e| ParseError::invalid_method(format!("{token}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_matching() {
        let set = MethodSet::GET | MethodSet::POST;
        assert!(set.matches(&Method::GET));
        assert!(set.matches(&Method::POST));
        assert!(!set.matches(&Method::PUT));
        assert!(MethodSet::ANY.matches(&Method::from_bytes(b"PROPFIND").unwrap()));
        assert!(!MethodSet::ANY.matches(&Method::CONNECT));
    }

    #[test]
    fn parse_known_methods_only() {
        assert_eq!(parse_method("GET").unwrap(), Method::GET);
        assert_eq!(parse_method("MKCOL").unwrap().as_str(), "MKCOL");
        assert!(matches!(parse_method("get"), Err(ParseError::InvalidMethod(_))));
        assert!(matches!(parse_method("TRACE"), Err(ParseError::InvalidMethod(_))));
    }

    #[test]
    fn debug_lists_names() {
        assert_eq!(format!("{:?}", MethodSet::GET | MethodSet::HEAD), "MethodSet(GET|HEAD)");
        assert_eq!(format!("{:?}", MethodSet::ANY), "MethodSet(ANY)");
    }
}
