//! XML envelope codec.
//!
//! ```text
//! <?xml version="1.0"?><data method="PUBLISH" topic="news"><msg>hello</msg></data>
//! ```
//!
//! The payload travels as element text. String payloads are written as-is,
//! any other value as its compact JSON text, so decoding always yields a
//! string.

use crate::codec::Codec;
use crate::error::ProtocolError;
use crate::message::{Envelope, Method};
use bytes::Bytes;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::Value;

const ROOT_ELEMENT: &str = "data";
const MSG_ELEMENT: &str = "msg";

fn xml_err(e: impl std::fmt::Display) -> ProtocolError {
    ProtocolError::Xml(e.to_string())
}

/// Renders a payload as element text.
fn payload_text(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// XML document codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlCodec;

impl Codec for XmlCodec {
    fn encode(&self, envelope: &Envelope) -> Result<Bytes, ProtocolError> {
        let mut writer = Writer::new(Vec::with_capacity(128));
        let text = payload_text(&envelope.payload);

        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", None, None)))
            .map_err(xml_err)?;
        let root = BytesStart::new(ROOT_ELEMENT).with_attributes([
            ("method", envelope.method.as_str()),
            ("topic", envelope.topic.as_str()),
        ]);
        writer.write_event(Event::Start(root)).map_err(xml_err)?;
        writer
            .write_event(Event::Start(BytesStart::new(MSG_ELEMENT)))
            .map_err(xml_err)?;
        if !text.is_empty() {
            writer
                .write_event(Event::Text(BytesText::new(&text)))
                .map_err(xml_err)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(MSG_ELEMENT)))
            .map_err(xml_err)?;
        writer
            .write_event(Event::End(BytesEnd::new(ROOT_ELEMENT)))
            .map_err(xml_err)?;

        Ok(Bytes::from(writer.into_inner()))
    }

    fn decode(&self, payload: &[u8]) -> Result<Envelope, ProtocolError> {
        let mut reader = Reader::from_reader(payload);
        let mut buf = Vec::new();

        let mut method: Option<String> = None;
        let mut topic: Option<String> = None;
        let mut msg: Option<String> = None;
        let mut depth = 0usize;
        let mut in_msg = false;

        loop {
            match reader.read_event_into(&mut buf).map_err(xml_err)? {
                Event::Start(e) => {
                    depth += 1;
                    if depth == 1 {
                        read_root_attributes(&e, &mut method, &mut topic)?;
                    } else if depth == 2 && e.name().as_ref() == MSG_ELEMENT.as_bytes() {
                        in_msg = true;
                        msg.get_or_insert_with(String::new);
                    }
                }
                Event::Empty(e) => {
                    if depth == 0 {
                        read_root_attributes(&e, &mut method, &mut topic)?;
                    } else if depth == 1 && e.name().as_ref() == MSG_ELEMENT.as_bytes() {
                        msg.get_or_insert_with(String::new);
                    }
                }
                Event::Text(e) if in_msg => {
                    let text = e.unescape().map_err(xml_err)?;
                    msg.get_or_insert_with(String::new).push_str(&text);
                }
                Event::CData(e) if in_msg => {
                    let text = std::str::from_utf8(&e).map_err(|_| ProtocolError::InvalidUtf8)?;
                    msg.get_or_insert_with(String::new).push_str(text);
                }
                Event::End(_) => {
                    if depth == 2 {
                        in_msg = false;
                    }
                    depth = depth.saturating_sub(1);
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        let method: Method = method.ok_or(ProtocolError::MissingField("method"))?.parse()?;
        let topic = topic.ok_or(ProtocolError::MissingField("topic"))?;
        let msg = msg.ok_or(ProtocolError::MissingField("msg"))?;

        Ok(Envelope {
            method,
            topic,
            payload: Value::String(msg),
        })
    }
}

fn read_root_attributes(
    element: &BytesStart<'_>,
    method: &mut Option<String>,
    topic: &mut Option<String>,
) -> Result<(), ProtocolError> {
    if element.name().as_ref() != ROOT_ELEMENT.as_bytes() {
        return Err(ProtocolError::Xml(format!(
            "unexpected root element <{}>",
            String::from_utf8_lossy(element.name().as_ref())
        )));
    }

    for attr in element.attributes() {
        let attr = attr.map_err(xml_err)?;
        let value = attr.unescape_value().map_err(xml_err)?.into_owned();
        match attr.key.as_ref() {
            b"method" => *method = Some(value),
            b"topic" => *topic = Some(value),
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_xml_wire_shape() {
        let env = Envelope::publish("news", "hello");
        let bytes = XmlCodec.encode(&env).unwrap();
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#"<?xml version="1.0"?><data method="PUBLISH" topic="news"><msg>hello</msg></data>"#
        );
    }

    #[test]
    fn test_xml_escaping() {
        let env = Envelope::publish(r#"a&b "quoted""#, "<tag> & 'stuff'");
        let bytes = XmlCodec.encode(&env).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(!text.contains("<tag>"));

        assert_eq!(XmlCodec.decode(&bytes).unwrap(), env);
    }

    #[test]
    fn test_xml_empty_msg() {
        let env = XmlCodec
            .decode(br#"<data method="SUBSCRIBE" topic="a"><msg/></data>"#)
            .unwrap();
        assert_eq!(env.method, Method::Subscribe);
        assert_eq!(env.payload, json!(""));

        let env = XmlCodec
            .decode(br#"<?xml version="1.0"?><data method="SUBSCRIBE" topic="a"><msg></msg></data>"#)
            .unwrap();
        assert_eq!(env.payload, json!(""));
    }

    #[test]
    fn test_xml_non_string_payload_becomes_text() {
        let env = Envelope::list_topics_answer("a", vec!["x".to_string(), "y".to_string()]);
        let bytes = XmlCodec.encode(&env).unwrap();
        let decoded = XmlCodec.decode(&bytes).unwrap();
        assert_eq!(decoded.method, Method::ListTopicsAnswer);
        assert_eq!(decoded.payload, json!(r#"["x","y"]"#));

        let decoded = XmlCodec
            .decode(&XmlCodec.encode(&Envelope::publish("t", 42)).unwrap())
            .unwrap();
        assert_eq!(decoded.payload, json!("42"));
    }

    #[test]
    fn test_xml_missing_parts() {
        let result = XmlCodec.decode(br#"<data topic="a"><msg>x</msg></data>"#);
        assert!(matches!(result, Err(ProtocolError::MissingField("method"))));

        let result = XmlCodec.decode(br#"<data method="PUBLISH"><msg>x</msg></data>"#);
        assert!(matches!(result, Err(ProtocolError::MissingField("topic"))));

        let result = XmlCodec.decode(br#"<data method="PUBLISH" topic="a"/>"#);
        assert!(matches!(result, Err(ProtocolError::MissingField("msg"))));
    }

    #[test]
    fn test_xml_wrong_root() {
        let result = XmlCodec.decode(br#"<envelope method="PUBLISH" topic="a"><msg/></envelope>"#);
        assert!(matches!(result, Err(ProtocolError::Xml(_))));
    }

    #[test]
    fn test_xml_unknown_method() {
        let result = XmlCodec.decode(br#"<data method="NOPE" topic="a"><msg/></data>"#);
        assert!(matches!(result, Err(ProtocolError::UnknownMethod(_))));
    }

    #[test]
    fn test_xml_cdata() {
        let env = XmlCodec
            .decode(br#"<data method="PUBLISH" topic="a"><msg><![CDATA[<raw>]]></msg></data>"#)
            .unwrap();
        assert_eq!(env.payload, json!("<raw>"));
    }
}
