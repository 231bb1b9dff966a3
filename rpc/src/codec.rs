//! XML-RPC encoding and decoding of [`Value`]s
//!
//! Requests are written as compact `methodCall` documents. Responses and
//! server callbacks are read with a small recursive-descent walk over
//! `quick_xml` pull events, so every element is checked against what the
//! protocol allows at that position.

use crate::error::{CodecError, RpcFault};
use crate::value::Value;
use indexmap::IndexMap;
use log::debug;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fmt::Display;

/// Strings containing this marker carry UI markup and are sent as CDATA
pub const MANIALINK_MARKER: &str = "<manialink";

/// A decoded `methodResponse`
#[derive(Debug, Clone, PartialEq)]
pub enum MethodResponse {
    Params(Value),
    Fault(RpcFault),
}

/// A decoded `methodCall`, which is how the server delivers callbacks
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub method: String,
    pub params: Vec<Value>,
}

impl MethodCall {
    /// Flattens the call into `[method, [params...]]`
    pub fn into_value(self) -> Value {
        Value::Array(vec![Value::Str(self.method), Value::Array(self.params)])
    }
}

pub fn encode_call(method: &str, params: &[Value]) -> Result<String, CodecError> {
    let mut xml = String::with_capacity(128);
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<methodCall><methodName>");
    xml.push_str(&escape(method));
    xml.push_str("</methodName><params>");

    for param in params {
        xml.push_str("<param>");
        write_value(param, &mut xml)?;
        xml.push_str("</param>");
    }

    xml.push_str("</params></methodCall>");
    Ok(xml)
}

/// Encodes a single value as a `<value>` element
pub fn encode_value(value: &Value) -> Result<String, CodecError> {
    let mut xml = String::new();
    write_value(value, &mut xml)?;
    Ok(xml)
}

fn write_value(value: &Value, out: &mut String) -> Result<(), CodecError> {
    out.push_str("<value>");

    match value {
        Value::Nil => out.push_str("<nil/>"),
        Value::Bool(b) => out.push_str(if *b {
            "<boolean>1</boolean>"
        } else {
            "<boolean>0</boolean>"
        }),
        Value::Int(i) => {
            out.push_str("<int>");
            out.push_str(&i.to_string());
            out.push_str("</int>");
        }
        Value::Double(d) => {
            if !d.is_finite() {
                return Err(CodecError::NonFiniteDouble(*d));
            }
            out.push_str("<double>");
            out.push_str(&d.to_string());
            out.push_str("</double>");
        }
        Value::Str(s) => write_string(s, out),
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                write_value(item, out)?;
            }
            out.push_str("</data></array>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                out.push_str("<member><name>");
                out.push_str(&escape(name.as_str()));
                out.push_str("</name>");
                write_value(member, out)?;
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
    }

    out.push_str("</value>");
    Ok(())
}

fn write_string(s: &str, out: &mut String) {
    out.push_str("<string>");
    if s.contains(MANIALINK_MARKER) {
        // a literal "]]>" would end the section early
        out.push_str("<![CDATA[");
        out.push_str(&s.replace("]]>", "]]]]><![CDATA[>"));
        out.push_str("]]>");
    } else {
        out.push_str(&escape(s));
    }
    out.push_str("</string>");
}

pub fn decode_response(xml: &str) -> Result<MethodResponse, CodecError> {
    let mut reader = XmlReader::new(xml);
    reader.expect_start("methodResponse")?;

    let response = match reader.next_child("params or fault")? {
        Some(name) if name == "params" => {
            let mut params = reader.read_params()?;
            if params.is_empty() {
                MethodResponse::Params(Value::Nil)
            } else {
                MethodResponse::Params(params.swap_remove(0))
            }
        }
        Some(name) if name == "fault" => {
            reader.expect_start("value")?;
            let detail = reader.read_value()?;
            reader.expect_end()?;
            MethodResponse::Fault(fault_from_value(&detail))
        }
        Some(name) => {
            return Err(CodecError::UnexpectedElement {
                expected: "params or fault",
                found: name,
            })
        }
        None => return Err(CodecError::MissingElement("params")),
    };

    reader.expect_end()?;
    Ok(response)
}

pub fn decode_call(xml: &str) -> Result<MethodCall, CodecError> {
    let mut reader = XmlReader::new(xml);
    reader.expect_start("methodCall")?;

    let mut method = None;
    let mut params = Vec::new();

    while let Some(child) = reader.next_child("methodName or params")? {
        match child.as_str() {
            "methodName" => method = Some(reader.read_text()?.trim().to_string()),
            "params" => params = reader.read_params()?,
            _ => {
                return Err(CodecError::UnexpectedElement {
                    expected: "methodName or params",
                    found: child,
                })
            }
        }
    }

    let method = method.ok_or(CodecError::MissingElement("methodName"))?;
    Ok(MethodCall { method, params })
}

/// Decodes a standalone `<value>` element
pub fn decode_value(xml: &str) -> Result<Value, CodecError> {
    let mut reader = XmlReader::new(xml);
    reader.expect_start("value")?;
    reader.read_value()
}

fn fault_from_value(detail: &Value) -> RpcFault {
    let code = detail
        .get("faultCode")
        .and_then(Value::as_i32)
        .unwrap_or(0);
    let message = detail
        .get("faultString")
        .and_then(Value::as_str)
        .unwrap_or("");
    RpcFault::new(code, message)
}

struct XmlReader<'a> {
    reader: Reader<&'a [u8]>,
}

impl<'a> XmlReader<'a> {
    fn new(xml: &'a str) -> Self {
        let mut reader = Reader::from_str(xml);
        reader.expand_empty_elements(true);
        Self { reader }
    }

    fn xml_error(&self, e: impl Display) -> CodecError {
        CodecError::Xml {
            position: self.reader.buffer_position(),
            message: e.to_string(),
        }
    }

    /// Next event that carries document content
    fn next(&mut self) -> Result<Event<'a>, CodecError> {
        loop {
            let event = match self.reader.read_event() {
                Ok(event) => event,
                Err(e) => return Err(self.xml_error(e)),
            };

            match event {
                Event::Comment(_) | Event::Decl(_) | Event::PI(_) | Event::DocType(_) => continue,
                Event::Eof => return Err(CodecError::UnexpectedEof),
                other => return Ok(other),
            }
        }
    }

    /// Returns the name of the next child element, or `None` once the
    /// enclosing element closes. Whitespace between elements is skipped.
    fn next_child(&mut self, expected: &'static str) -> Result<Option<String>, CodecError> {
        loop {
            match self.next()? {
                Event::Start(e) => return Ok(Some(tag_name(e.name().as_ref()))),
                Event::End(_) => return Ok(None),
                Event::Text(t) if is_blank(&t) => continue,
                other => return Err(unexpected(expected, &other)),
            }
        }
    }

    fn expect_start(&mut self, name: &'static str) -> Result<(), CodecError> {
        match self.next_child(name)? {
            Some(found) if found == name => Ok(()),
            Some(found) => Err(CodecError::UnexpectedElement {
                expected: name,
                found,
            }),
            None => Err(CodecError::MissingElement(name)),
        }
    }

    fn expect_end(&mut self) -> Result<(), CodecError> {
        loop {
            match self.next()? {
                Event::End(_) => return Ok(()),
                Event::Text(t) if is_blank(&t) => continue,
                other => return Err(unexpected("closing tag", &other)),
            }
        }
    }

    /// Collects character data up to the end of the current element
    fn read_text(&mut self) -> Result<String, CodecError> {
        let mut text = String::new();
        loop {
            match self.next()? {
                Event::Text(t) => {
                    let unescaped = t.unescape().map_err(|e| self.xml_error(e))?;
                    text.push_str(&unescaped);
                }
                Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c.into_inner())),
                Event::End(_) => return Ok(text),
                other => return Err(unexpected("text", &other)),
            }
        }
    }

    /// Reads `<param><value>..</value></param>` entries up to `</params>`
    fn read_params(&mut self) -> Result<Vec<Value>, CodecError> {
        let mut params = Vec::new();
        while let Some(name) = self.next_child("param")? {
            if name != "param" {
                return Err(CodecError::UnexpectedElement {
                    expected: "param",
                    found: name,
                });
            }
            self.expect_start("value")?;
            params.push(self.read_value()?);
            self.expect_end()?;
        }
        Ok(params)
    }

    /// Reads the content of a `<value>` element whose start tag was consumed
    fn read_value(&mut self) -> Result<Value, CodecError> {
        let mut text = String::new();
        loop {
            match self.next()? {
                Event::Text(t) => {
                    let unescaped = t.unescape().map_err(|e| self.xml_error(e))?;
                    text.push_str(&unescaped);
                }
                Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c.into_inner())),
                Event::Start(e) => {
                    let tag = tag_name(e.name().as_ref());
                    if !text.trim().is_empty() {
                        return Err(CodecError::UnexpectedElement {
                            expected: "text or a single typed element",
                            found: tag,
                        });
                    }
                    let value = self.read_typed(&tag)?;
                    self.expect_end()?;
                    return Ok(value);
                }
                // untyped values are strings
                Event::End(_) => return Ok(Value::Str(text)),
                other => return Err(unexpected("value content", &other)),
            }
        }
    }

    fn read_typed(&mut self, tag: &str) -> Result<Value, CodecError> {
        match tag {
            "string" => Ok(Value::Str(self.read_text()?)),
            "int" | "i4" => {
                let text = self.read_text()?;
                text.trim()
                    .parse::<i32>()
                    .map(Value::Int)
                    .map_err(|_| CodecError::InvalidScalar { kind: "int", text })
            }
            "double" => {
                let text = self.read_text()?;
                match text.trim().parse::<f64>() {
                    Ok(d) if d.is_finite() => Ok(Value::Double(d)),
                    _ => Err(CodecError::InvalidScalar {
                        kind: "double",
                        text,
                    }),
                }
            }
            "boolean" => {
                let text = self.read_text()?;
                match text.trim() {
                    "1" | "true" => Ok(Value::Bool(true)),
                    "0" | "false" => Ok(Value::Bool(false)),
                    _ => Err(CodecError::InvalidScalar {
                        kind: "boolean",
                        text,
                    }),
                }
            }
            "nil" => {
                let text = self.read_text()?;
                if text.trim().is_empty() {
                    Ok(Value::Nil)
                } else {
                    Err(CodecError::InvalidScalar { kind: "nil", text })
                }
            }
            "array" => self.read_array(),
            "struct" => self.read_struct(),
            other => Err(CodecError::UnknownType(other.to_string())),
        }
    }

    fn read_array(&mut self) -> Result<Value, CodecError> {
        let mut items = Vec::new();

        match self.next_child("data")? {
            None => return Ok(Value::Array(items)),
            Some(name) if name == "data" => {}
            Some(name) => {
                return Err(CodecError::UnexpectedElement {
                    expected: "data",
                    found: name,
                })
            }
        }

        while let Some(name) = self.next_child("value")? {
            if name != "value" {
                return Err(CodecError::UnexpectedElement {
                    expected: "value",
                    found: name,
                });
            }
            items.push(self.read_value()?);
        }

        self.expect_end()?;
        Ok(Value::Array(items))
    }

    fn read_struct(&mut self) -> Result<Value, CodecError> {
        let mut members = IndexMap::new();

        while let Some(name) = self.next_child("member")? {
            if name != "member" {
                return Err(CodecError::UnexpectedElement {
                    expected: "member",
                    found: name,
                });
            }

            let (key, value) = self.read_member()?;
            if members.contains_key(&key) {
                // the server repeats some fields; the first one is authoritative
                debug!("Ignoring duplicate struct member {}", key);
                continue;
            }
            members.insert(key, value);
        }

        Ok(Value::Struct(members))
    }

    fn read_member(&mut self) -> Result<(String, Value), CodecError> {
        let mut key = None;
        let mut value = None;

        while let Some(child) = self.next_child("name or value")? {
            match child.as_str() {
                "name" => key = Some(self.read_text()?),
                "value" => value = Some(self.read_value()?),
                _ => {
                    return Err(CodecError::UnexpectedElement {
                        expected: "name or value",
                        found: child,
                    })
                }
            }
        }

        match (key, value) {
            (Some(key), Some(value)) => Ok((key, value)),
            (None, _) => Err(CodecError::MissingElement("name")),
            (Some(_), None) => Err(CodecError::MissingElement("value")),
        }
    }
}

fn tag_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

fn is_blank(raw: &[u8]) -> bool {
    raw.iter().all(u8::is_ascii_whitespace)
}

fn unexpected(expected: &'static str, event: &Event<'_>) -> CodecError {
    let found = match event {
        Event::Start(e) => tag_name(e.name().as_ref()),
        Event::End(e) => format!("/{}", tag_name(e.name().as_ref())),
        Event::Text(_) => "text".to_string(),
        Event::CData(_) => "CDATA".to_string(),
        _ => "markup".to_string(),
    };
    CodecError::UnexpectedElement { expected, found }
}
