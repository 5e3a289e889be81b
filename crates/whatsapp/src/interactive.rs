//! Cloud API request bodies for each outbound message kind.

use serde_json::{json, Map, Value};

use vendabot_core::domain::reply::{truncate, InteractiveReply, MAX_BODY};

use crate::transport::{MediaKind, OutboundMedia};

fn envelope(to: &str, kind: &str) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("messaging_product".into(), json!("whatsapp"));
    body.insert("recipient_type".into(), json!("individual"));
    body.insert("to".into(), json!(to));
    body.insert("type".into(), json!(kind));
    body
}

pub fn text(to: &str, body: &str) -> Value {
    let mut message = envelope(to, "text");
    message.insert("text".into(), json!({ "preview_url": false, "body": body }));
    Value::Object(message)
}

pub fn template(to: &str, name: &str, language: &str, parameters: &[String]) -> Value {
    let mut message = envelope(to, "template");
    let mut template = json!({ "name": name, "language": { "code": language } });
    if !parameters.is_empty() {
        let parameters: Vec<Value> =
            parameters.iter().map(|value| json!({ "type": "text", "text": value })).collect();
        template["components"] = json!([{ "type": "body", "parameters": parameters }]);
    }
    message.insert("template".into(), template);
    Value::Object(message)
}

/// Renders an interactive reply after clamping it to provider limits.
pub fn interactive(to: &str, reply: &InteractiveReply) -> Value {
    let mut message = envelope(to, "interactive");
    let payload = match reply.clone().normalized() {
        InteractiveReply::Buttons { body, header, footer, buttons } => {
            let buttons: Vec<Value> = buttons
                .into_iter()
                .map(|button| {
                    json!({ "type": "reply", "reply": { "id": button.id, "title": button.title } })
                })
                .collect();
            let mut value =
                decorate(json!({ "type": "button", "body": { "text": body } }), header, footer);
            value["action"] = json!({ "buttons": buttons });
            value
        }
        InteractiveReply::List { body, header, footer, button_label, sections } => {
            let sections: Vec<Value> = sections
                .into_iter()
                .map(|section| {
                    let rows: Vec<Value> = section
                        .rows
                        .into_iter()
                        .map(|row| {
                            let mut value = json!({ "id": row.id, "title": row.title });
                            if let Some(description) = row.description {
                                value["description"] = json!(description);
                            }
                            value
                        })
                        .collect();
                    json!({ "title": section.title, "rows": rows })
                })
                .collect();
            let mut value =
                decorate(json!({ "type": "list", "body": { "text": body } }), header, footer);
            value["action"] = json!({ "button": button_label, "sections": sections });
            value
        }
    };
    message.insert("interactive".into(), payload);
    Value::Object(message)
}

fn decorate(mut value: Value, header: Option<String>, footer: Option<String>) -> Value {
    if let Some(header) = header {
        value["header"] = json!({ "type": "text", "text": header });
    }
    if let Some(footer) = footer {
        value["footer"] = json!({ "text": footer });
    }
    value
}

pub fn media(to: &str, media: &OutboundMedia) -> Value {
    let kind = media.kind.as_str();
    let mut message = envelope(to, kind);
    let mut object = json!({ "link": media.link });
    if let Some(caption) = media.caption.as_deref().filter(|_| media.kind != MediaKind::Audio) {
        object["caption"] = json!(truncate(caption, MAX_BODY));
    }
    if let (MediaKind::Document, Some(filename)) = (media.kind, media.filename.as_deref()) {
        object["filename"] = json!(filename);
    }
    message.insert(kind.into(), object);
    Value::Object(message)
}
