//! The XML description block embedded in challenge files
//!
//! ```xml
//! <header type="challenge" exever="2.11.26" exebuild="2011-02-21_18_07" version="5" lightmap="0">
//!   <ident uid="..." name="..." author="..." authorzone="World|Europe"/>
//!   <desc envir="Stadium" mood="Day" type="Race" nblaps="0" price="1234" validated="1"/>
//!   <playermodel id=""/>
//!   <times bronze="..." silver="..." gold="..." authortime="..." authorscore="..."/>
//!   <deps>
//!     <dep file="ChallengeMusics\Song.ogg" url="http://..."/>
//!   </deps>
//! </header>
//! ```
//!
//! Only the first two levels are kept: each element stores its attributes
//! under its upper-cased tag name. Text directly inside a third-level element
//! is stored as an extra attribute of its parent.

use crate::error::DecodeError;
use indexmap::IndexMap;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::{Captures, Regex};
use serde::Serialize;
use std::borrow::Cow;
use std::sync::OnceLock;

pub type Attributes = IndexMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackXml {
    /// Attributes of the root and its children, keyed by tag name
    pub elements: IndexMap<String, Attributes>,
    /// Attributes of every `DEP` element, in document order
    pub deps: Vec<Attributes>,
}

impl TrackXml {
    pub fn attribute(&self, element: &str, name: &str) -> Option<&str> {
        self.elements
            .get(element)
            .and_then(|attrs| attrs.get(name))
            .map(String::as_str)
    }

    pub fn parse(xml: &str) -> Result<Self, DecodeError> {
        let xml = escape_stray_ampersands(xml);
        let mut reader = Reader::from_str(&xml);
        reader.expand_empty_elements(true);

        let mut parsed = TrackXml::default();
        let mut stack: Vec<String> = Vec::new();

        loop {
            let event = reader.read_event().map_err(|e| {
                DecodeError::Xml(format!("{} at byte {}", e, reader.buffer_position()))
            })?;

            match event {
                Event::Start(e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_uppercase();
                    let attrs = read_attributes(&e)?;
                    stack.push(name.clone());

                    if name == "DEP" {
                        parsed.deps.push(attrs);
                    } else if stack.len() <= 2 {
                        parsed.elements.insert(name, attrs);
                    }
                }
                Event::End(_) => {
                    stack.pop();
                }
                Event::Text(t) => {
                    let text = t
                        .unescape()
                        .map_err(|e| DecodeError::Xml(e.to_string()))?;
                    parsed.store_text(&stack, text);
                }
                Event::CData(c) => {
                    let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                    parsed.store_text(&stack, Cow::Owned(text));
                }
                Event::Eof => {
                    if let Some(open) = stack.last() {
                        return Err(DecodeError::Xml(format!(
                            "unclosed element <{}> at end of input",
                            open
                        )));
                    }
                    break;
                }
                _ => {}
            }
        }

        Ok(parsed)
    }

    fn store_text(&mut self, stack: &[String], text: Cow<'_, str>) {
        if stack.len() != 3 || text.trim().is_empty() {
            return;
        }
        self.elements
            .entry(stack[1].clone())
            .or_default()
            .insert(stack[2].clone(), text.into_owned());
    }
}

fn read_attributes(element: &BytesStart<'_>) -> Result<Attributes, DecodeError> {
    element
        .attributes()
        .map(|attr| {
            let attr = attr.map_err(|e| DecodeError::Xml(format!("bad attribute: {}", e)))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).to_uppercase();
            let value = attr
                .unescape_value()
                .map_err(|e| DecodeError::Xml(format!("bad attribute value: {}", e)))?
                .into_owned();
            Ok((key, value))
        })
        .collect()
}

fn entity_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"&(?:(amp|quot|apos|lt|gt);)?").expect("entity pattern"))
}

/// Escapes every `&` that does not start one of the five predefined entities.
///
/// Track authors put raw ampersands into names and comments, which the game
/// writes out verbatim.
pub fn escape_stray_ampersands(xml: &str) -> Cow<'_, str> {
    entity_regex().replace_all(xml, |caps: &Captures<'_>| match caps.get(1) {
        Some(entity) => format!("&{};", entity.as_str()),
        None => "&amp;".to_string(),
    })
}
