//! Assembled headers and their FITS card encoding.
//!
//! The on-wire form of a header is FITS header text: 80-column ASCII cards terminated
//! by an `END` card and padded with spaces to a multiple of 2880 bytes.

use crate::value::StatusValue;
use serde::{Deserialize, Serialize};

/// Width of one header card.
pub const CARD_WIDTH: usize = 80;
/// FITS block size; serialized headers are padded to a multiple of it.
pub const BLOCK_SIZE: usize = 2880;
/// Keyword of commentary cards.
pub const COMMENT_KEY: &str = "COMMENT";

const KEY_WIDTH: usize = 8;
const VALUE_WIDTH: usize = 20;
const COMMENT_TEXT_WIDTH: usize = CARD_WIDTH - KEY_WIDTH;

/// One `(key, value, comment)` record of an assembled header.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeaderCard {
    pub key: String,
    /// `None` for commentary cards.
    pub value: Option<StatusValue>,
    pub comment: String,
}

impl HeaderCard {
    pub fn new(key: impl Into<String>, value: StatusValue, comment: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value),
            comment: comment.into(),
        }
    }

    pub fn comment(text: impl Into<String>) -> Self {
        Self {
            key: COMMENT_KEY.to_string(),
            value: None,
            comment: text.into(),
        }
    }

    pub fn is_commentary(&self) -> bool {
        self.value.is_none()
    }

    /// Render this card as one or more 80-column images.
    ///
    /// Commentary text longer than one card wraps onto continuation cards; value
    /// cards are truncated at column 80.
    pub fn to_images(&self) -> Vec<String> {
        let Some(value) = &self.value else {
            let text = ascii(&self.comment);
            if text.is_empty() {
                return vec![pad_card(&self.key)];
            }
            return text
                .as_bytes()
                .chunks(COMMENT_TEXT_WIDTH)
                .map(|chunk| {
                    let chunk = String::from_utf8_lossy(chunk);
                    pad_card(&format!("{:<width$}{}", self.key, chunk, width = KEY_WIDTH))
                })
                .collect();
        };

        let key = ascii(&self.key);
        let mut image = if key.len() <= KEY_WIDTH {
            format!(
                "{:<kw$}= {}",
                key,
                format_value_field(value),
                kw = KEY_WIDTH
            )
        } else {
            format!("HIERARCH {} = {}", key, format_value(value))
        };
        if !self.comment.is_empty() {
            image.push_str(" / ");
            image.push_str(&ascii(&self.comment));
        }
        vec![pad_card(&image)]
    }

    /// Decode one 80-column card image. Returns `None` for the `END` card and blanks.
    pub fn parse(image: &str) -> Option<Self> {
        let image = image.trim_end();
        if image.is_empty() || image == "END" {
            return None;
        }

        let key_field = image.get(..KEY_WIDTH.min(image.len()))?.trim_end();
        if key_field == COMMENT_KEY || key_field == "HISTORY" || key_field.is_empty() {
            let text = image.get(KEY_WIDTH..).unwrap_or("").trim_end();
            return Some(Self {
                key: key_field.to_string(),
                value: None,
                comment: text.to_string(),
            });
        }

        let (key, rest) = if key_field == "HIERARCH" {
            let body = image.get(KEY_WIDTH..)?.trim_start();
            let (key, rest) = body.split_once('=')?;
            (key.trim().to_string(), rest)
        } else {
            if image.get(KEY_WIDTH..KEY_WIDTH + 2) != Some("= ") {
                return Some(Self::comment(image.to_string()));
            }
            (key_field.to_string(), image.get(KEY_WIDTH + 2..)?)
        };

        let (value, comment) = parse_value_and_comment(rest);
        Some(Self {
            key,
            value: Some(value),
            comment,
        })
    }
}

/// Ordered header built for one request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AssembledHeader {
    cards: Vec<HeaderCard>,
    /// Aliases that could not be resolved while building this header.
    pub missing: Vec<String>,
}

impl AssembledHeader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, replacing an existing card with the same key in place.
    pub fn set(&mut self, key: impl Into<String>, value: StatusValue, comment: impl Into<String>) {
        let card = HeaderCard::new(key, value, comment);
        match self
            .cards
            .iter_mut()
            .find(|c| !c.is_commentary() && c.key == card.key)
        {
            Some(existing) => *existing = card,
            None => self.cards.push(card),
        }
    }

    /// Append a commentary card.
    pub fn add_comment(&mut self, text: impl Into<String>) {
        self.cards.push(HeaderCard::comment(text));
    }

    pub fn cards(&self) -> &[HeaderCard] {
        &self.cards
    }

    /// Value of the first card with `key`.
    pub fn get(&self, key: &str) -> Option<&StatusValue> {
        self.cards
            .iter()
            .find(|c| c.key == key)
            .and_then(|c| c.value.as_ref())
    }

    /// Value-card keys in emission order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.cards
            .iter()
            .filter(|c| !c.is_commentary())
            .map(|c| c.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Serialize to FITS header bytes, `END` card and block padding included.
    pub fn to_fits_bytes(&self) -> Vec<u8> {
        let mut text = String::with_capacity(BLOCK_SIZE);
        for card in &self.cards {
            for image in card.to_images() {
                text.push_str(&image);
            }
        }
        text.push_str(&pad_card("END"));
        let padded = text.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        let mut bytes = text.into_bytes();
        bytes.resize(padded, b' ');
        bytes
    }

    /// Decode FITS header bytes produced by [`AssembledHeader::to_fits_bytes`].
    pub fn from_fits_bytes(bytes: &[u8]) -> Self {
        let mut header = Self::new();
        for chunk in bytes.chunks(CARD_WIDTH) {
            let image = String::from_utf8_lossy(chunk);
            if image.trim_end() == "END" {
                break;
            }
            if let Some(card) = HeaderCard::parse(&image) {
                header.cards.push(card);
            }
        }
        header
    }
}

fn ascii(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
        .collect()
}

fn pad_card(image: &str) -> String {
    let mut image: String = image.chars().take(CARD_WIDTH).collect();
    while image.len() < CARD_WIDTH {
        image.push(' ');
    }
    image
}

fn format_float(value: f64) -> String {
    let mut text = format!("{:?}", value).to_ascii_uppercase();
    if value.is_finite() && !text.contains('.') && !text.contains('E') {
        text.push_str(".0");
    }
    text
}

fn format_value(value: &StatusValue) -> String {
    match value {
        StatusValue::Str(s) => format!("'{:<8}'", ascii(s).replace('\'', "''")),
        StatusValue::Float(v) => format_float(*v),
        StatusValue::Int(v) => v.to_string(),
    }
}

/// Strings are left-justified, numbers right-justified, in a 20-column field.
fn format_value_field(value: &StatusValue) -> String {
    let text = format_value(value);
    match value {
        StatusValue::Str(_) => format!("{:<width$}", text, width = VALUE_WIDTH),
        _ => format!("{:>width$}", text, width = VALUE_WIDTH),
    }
}

fn parse_value_and_comment(rest: &str) -> (StatusValue, String) {
    let rest = rest.trim_start();
    if let Some(body) = rest.strip_prefix('\'') {
        let mut value = String::new();
        let mut chars = body.char_indices().peekable();
        let mut end = body.len();
        while let Some((i, c)) = chars.next() {
            if c == '\'' {
                if matches!(chars.peek(), Some((_, '\''))) {
                    value.push('\'');
                    chars.next();
                } else {
                    end = i + 1;
                    break;
                }
            } else {
                value.push(c);
            }
        }
        let comment = body[end..]
            .split_once('/')
            .map(|(_, c)| c.trim().to_string())
            .unwrap_or_default();
        return (StatusValue::Str(value.trim_end().to_string()), comment);
    }

    let (raw, comment) = match rest.split_once('/') {
        Some((raw, comment)) => (raw, comment.trim().to_string()),
        None => (rest, String::new()),
    };
    (StatusValue::infer(raw.trim()), comment)
}
