//! Minimal RFC 8941 structured-field support.
//!
//! Implements exactly the subset the signature headers need: bare items
//! (integer, string, token, byte sequence, boolean), parameters, inner
//! lists, and dictionaries. Serialization follows §4.1 of the RFC; parsing
//! follows the §4.2 algorithms for the same subset. Anything outside the
//! subset (decimals, dates) is rejected as `invalid-argument`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::SageError;

const MAX_INTEGER: i64 = 999_999_999_999_999;

/// A bare item.
#[derive(Debug, Clone, PartialEq)]
pub enum BareItem {
    Integer(i64),
    String(String),
    Token(String),
    Bytes(Vec<u8>),
    Boolean(bool),
}

impl BareItem {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            BareItem::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            BareItem::String(s) | BareItem::Token(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BareItem::Bytes(b) => Some(b),
            _ => None,
        }
    }

    fn serialize_into(&self, out: &mut String) -> Result<(), SageError> {
        match self {
            BareItem::Integer(i) => {
                if i.abs() > MAX_INTEGER {
                    return Err(SageError::InvalidArgument(format!(
                        "sf-integer out of range: {i}"
                    )));
                }
                out.push_str(&i.to_string());
            }
            BareItem::String(s) => {
                out.push('"');
                for c in s.chars() {
                    match c {
                        '"' | '\\' => {
                            out.push('\\');
                            out.push(c);
                        }
                        ' '..='~' => out.push(c),
                        _ => {
                            return Err(SageError::InvalidArgument(format!(
                                "sf-string with non-printable character {c:?}"
                            )))
                        }
                    }
                }
                out.push('"');
            }
            BareItem::Token(t) => {
                let mut chars = t.chars();
                let head_ok = chars
                    .next()
                    .is_some_and(|c| c.is_ascii_alphabetic() || c == '*');
                if !head_ok || !t.chars().skip(1).all(is_token_char) {
                    return Err(SageError::InvalidArgument(format!("invalid sf-token {t:?}")));
                }
                out.push_str(t);
            }
            BareItem::Bytes(b) => {
                out.push(':');
                out.push_str(&BASE64.encode(b));
                out.push(':');
            }
            BareItem::Boolean(b) => {
                out.push_str(if *b { "?1" } else { "?0" });
            }
        }
        Ok(())
    }
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '.' | '^' | '_' | '`' | '|'
                | '~' | ':' | '/'
        )
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.' | '*')
}

/// Ordered parameters attached to an item or inner list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Parameters(pub Vec<(String, BareItem)>);

impl Parameters {
    pub fn get(&self, key: &str) -> Option<&BareItem> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn serialize_into(&self, out: &mut String) -> Result<(), SageError> {
        for (key, value) in &self.0 {
            if key.is_empty()
                || !key.chars().next().is_some_and(|c| c.is_ascii_lowercase() || c == '*')
                || !key.chars().all(is_key_char)
            {
                return Err(SageError::InvalidArgument(format!("invalid sf-key {key:?}")));
            }
            out.push(';');
            out.push_str(key);
            if *value != BareItem::Boolean(true) {
                out.push('=');
                value.serialize_into(out)?;
            }
        }
        Ok(())
    }
}

/// An item with parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub value: BareItem,
    pub params: Parameters,
}

impl Item {
    pub fn new(value: BareItem) -> Self {
        Self { value, params: Parameters::default() }
    }

    pub fn serialize(&self) -> Result<String, SageError> {
        let mut out = String::new();
        self.value.serialize_into(&mut out)?;
        self.params.serialize_into(&mut out)?;
        Ok(out)
    }
}

/// A parenthesized inner list with parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InnerList {
    pub items: Vec<Item>,
    pub params: Parameters,
}

impl InnerList {
    pub fn serialize(&self) -> Result<String, SageError> {
        let mut out = String::from("(");
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(&item.serialize()?);
        }
        out.push(')');
        self.params.serialize_into(&mut out)?;
        Ok(out)
    }
}

/// A dictionary member value.
#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    Item(Item),
    InnerList(InnerList),
}

impl Member {
    fn serialize(&self) -> Result<String, SageError> {
        match self {
            Member::Item(i) => i.serialize(),
            Member::InnerList(l) => l.serialize(),
        }
    }
}

/// An ordered dictionary, as used by `Signature` and `Signature-Input`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dictionary(pub Vec<(String, Member)>);

impl Dictionary {
    pub fn get(&self, key: &str) -> Option<&Member> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn serialize(&self) -> Result<String, SageError> {
        let mut out = String::new();
        for (i, (key, member)) in self.0.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(key);
            out.push('=');
            out.push_str(&member.serialize()?);
        }
        Ok(out)
    }

    /// Parse a structured-field dictionary.
    pub fn parse(input: &str) -> Result<Self, SageError> {
        let mut p = Parser::new(input);
        let dict = p.parse_dictionary()?;
        p.skip_sp();
        if !p.at_end() {
            return Err(SageError::InvalidArgument(format!(
                "trailing data in structured field at byte {}",
                p.pos
            )));
        }
        Ok(dict)
    }
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { bytes: input.as_bytes(), pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn skip_sp(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t')) {
            self.pos += 1;
        }
    }

    fn fail(&self, what: &str) -> SageError {
        SageError::InvalidArgument(format!("{what} at byte {}", self.pos))
    }

    fn parse_dictionary(&mut self) -> Result<Dictionary, SageError> {
        let mut dict = Dictionary::default();
        self.skip_sp();
        while !self.at_end() {
            let key = self.parse_key()?;
            let member = if self.peek() == Some(b'=') {
                self.pos += 1;
                self.parse_member()?
            } else {
                // Bare key means boolean true with optional parameters.
                let params = self.parse_parameters()?;
                Member::Item(Item { value: BareItem::Boolean(true), params })
            };
            // Later occurrences of a key win, per RFC 8941 §4.2.2.
            dict.0.retain(|(k, _)| k != &key);
            dict.0.push((key, member));

            self.skip_sp();
            match self.peek() {
                None => break,
                Some(b',') => {
                    self.pos += 1;
                    self.skip_sp();
                    if self.at_end() {
                        return Err(self.fail("dictionary ends with comma"));
                    }
                }
                Some(_) => return Err(self.fail("expected comma between dictionary members")),
            }
        }
        Ok(dict)
    }

    fn parse_member(&mut self) -> Result<Member, SageError> {
        if self.peek() == Some(b'(') {
            Ok(Member::InnerList(self.parse_inner_list()?))
        } else {
            let value = self.parse_bare_item()?;
            let params = self.parse_parameters()?;
            Ok(Member::Item(Item { value, params }))
        }
    }

    fn parse_inner_list(&mut self) -> Result<InnerList, SageError> {
        if self.bump() != Some(b'(') {
            return Err(self.fail("expected inner list"));
        }
        let mut items = Vec::new();
        loop {
            self.skip_sp();
            match self.peek() {
                Some(b')') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => {
                    let value = self.parse_bare_item()?;
                    let params = self.parse_parameters()?;
                    items.push(Item { value, params });
                }
                None => return Err(self.fail("unterminated inner list")),
            }
        }
        let params = self.parse_parameters()?;
        Ok(InnerList { items, params })
    }

    fn parse_parameters(&mut self) -> Result<Parameters, SageError> {
        let mut params = Parameters::default();
        while self.peek() == Some(b';') {
            self.pos += 1;
            self.skip_sp();
            let key = self.parse_key()?;
            let value = if self.peek() == Some(b'=') {
                self.pos += 1;
                self.parse_bare_item()?
            } else {
                BareItem::Boolean(true)
            };
            params.0.retain(|(k, _)| k != &key);
            params.0.push((key, value));
        }
        Ok(params)
    }

    fn parse_key(&mut self) -> Result<String, SageError> {
        let start = self.pos;
        match self.peek() {
            Some(b) if (b as char).is_ascii_lowercase() || b == b'*' => {}
            _ => return Err(self.fail("expected sf-key")),
        }
        while self.peek().is_some_and(|b| is_key_char(b as char)) {
            self.pos += 1;
        }
        // Key characters are ASCII by construction.
        Ok(String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned())
    }

    fn parse_bare_item(&mut self) -> Result<BareItem, SageError> {
        match self.peek() {
            Some(b'"') => self.parse_string(),
            Some(b':') => self.parse_byte_sequence(),
            Some(b'?') => self.parse_boolean(),
            Some(b'-') => self.parse_integer(),
            Some(b) if b.is_ascii_digit() => self.parse_integer(),
            Some(b) if (b as char).is_ascii_alphabetic() || b == b'*' => self.parse_token(),
            _ => Err(self.fail("expected bare item")),
        }
    }

    fn parse_integer(&mut self) -> Result<BareItem, SageError> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        let digits_start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == digits_start {
            return Err(self.fail("expected digits"));
        }
        if self.peek() == Some(b'.') {
            return Err(self.fail("sf-decimal not supported"));
        }
        if self.pos - digits_start > 15 {
            return Err(self.fail("sf-integer too long"));
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| self.fail("invalid integer"))?;
        text.parse::<i64>()
            .map(BareItem::Integer)
            .map_err(|_| self.fail("invalid integer"))
    }

    fn parse_string(&mut self) -> Result<BareItem, SageError> {
        self.pos += 1; // opening quote
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(b'"') => return Ok(BareItem::String(out)),
                Some(b'\\') => match self.bump() {
                    Some(c @ (b'"' | b'\\')) => out.push(c as char),
                    _ => return Err(self.fail("invalid escape in sf-string")),
                },
                Some(b) if (0x20..=0x7e).contains(&b) => out.push(b as char),
                Some(_) => return Err(self.fail("non-printable byte in sf-string")),
                None => return Err(self.fail("unterminated sf-string")),
            }
        }
    }

    fn parse_token(&mut self) -> Result<BareItem, SageError> {
        let start = self.pos;
        self.pos += 1;
        while self.peek().is_some_and(|b| is_token_char(b as char)) {
            self.pos += 1;
        }
        Ok(BareItem::Token(
            String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned(),
        ))
    }

    fn parse_byte_sequence(&mut self) -> Result<BareItem, SageError> {
        self.pos += 1; // opening colon
        let start = self.pos;
        while self.peek().is_some_and(|b| b != b':') {
            self.pos += 1;
        }
        if self.bump() != Some(b':') {
            return Err(self.fail("unterminated byte sequence"));
        }
        let b64 = &self.bytes[start..self.pos - 1];
        let b64 = std::str::from_utf8(b64).map_err(|_| self.fail("invalid byte sequence"))?;
        BASE64
            .decode(b64)
            .map(BareItem::Bytes)
            .map_err(|_| self.fail("invalid base64 in byte sequence"))
    }

    fn parse_boolean(&mut self) -> Result<BareItem, SageError> {
        self.pos += 1; // '?'
        match self.bump() {
            Some(b'1') => Ok(BareItem::Boolean(true)),
            Some(b'0') => Ok(BareItem::Boolean(false)),
            _ => Err(self.fail("invalid sf-boolean")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_signature_input_shape() {
        let list = InnerList {
            items: vec![
                Item::new(BareItem::String("@method".into())),
                Item::new(BareItem::String("@authority".into())),
                Item {
                    value: BareItem::String("@query-param".into()),
                    params: Parameters(vec![("name".into(), BareItem::String("id".into()))]),
                },
            ],
            params: Parameters(vec![
                ("keyid".into(), BareItem::String("key-1".into())),
                ("alg".into(), BareItem::String("ed25519".into())),
                ("created".into(), BareItem::Integer(1_719_234_000)),
            ]),
        };
        assert_eq!(
            list.serialize().unwrap(),
            "(\"@method\" \"@authority\" \"@query-param\";name=\"id\");keyid=\"key-1\";alg=\"ed25519\";created=1719234000"
        );
    }

    #[test]
    fn dictionary_round_trip() {
        let text = "sig1=(\"@method\" \"date\");created=1618884473;keyid=\"test-key\", sig2=:aGVsbG8=:";
        let dict = Dictionary::parse(text).unwrap();
        assert_eq!(dict.0.len(), 2);
        match dict.get("sig1").unwrap() {
            Member::InnerList(l) => {
                assert_eq!(l.items.len(), 2);
                assert_eq!(l.params.get("created").unwrap().as_integer(), Some(1618884473));
            }
            other => panic!("expected inner list, got {other:?}"),
        }
        match dict.get("sig2").unwrap() {
            Member::Item(i) => assert_eq!(i.value.as_bytes(), Some(b"hello".as_ref())),
            other => panic!("expected item, got {other:?}"),
        }
        assert_eq!(Dictionary::parse(&dict.serialize().unwrap()).unwrap(), dict);
    }

    #[test]
    fn later_dictionary_keys_win() {
        let dict = Dictionary::parse("a=1, a=2").unwrap();
        assert_eq!(dict.0.len(), 1);
        match dict.get("a").unwrap() {
            Member::Item(i) => assert_eq!(i.value.as_integer(), Some(2)),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn string_escapes() {
        let item = Item::new(BareItem::String("a\"b\\c".into()));
        let text = item.serialize().unwrap();
        assert_eq!(text, "\"a\\\"b\\\\c\"");
        let dict = Dictionary::parse(&format!("k={text}")).unwrap();
        match dict.get("k").unwrap() {
            Member::Item(i) => assert_eq!(i.value.as_str(), Some("a\"b\\c")),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(Dictionary::parse("sig1=(").is_err());
        assert!(Dictionary::parse("sig1=\"unterminated").is_err());
        assert!(Dictionary::parse("UPPER=1").is_err());
        assert!(Dictionary::parse("a=1,").is_err());
        assert!(Dictionary::parse("a=1.5").is_err());
        assert!(Dictionary::parse("a=:!!:").is_err());
    }

    #[test]
    fn integer_range_enforced() {
        let mut out = String::new();
        assert!(BareItem::Integer(1_000_000_000_000_000)
            .serialize_into(&mut out)
            .is_err());
        assert!(Dictionary::parse("a=9999999999999999").is_err());
    }
}
