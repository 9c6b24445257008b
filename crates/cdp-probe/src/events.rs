//! Typed view over the raw CDP event stream. Only the events the
//! collector consumes are decoded; everything else stays on the floor.

use serde_json::Value;

use crate::transport::TransportEvent;

#[derive(Clone, Debug)]
pub enum ProbeEvent {
    /// The page called the exposed instrumentation binding.
    BindingCalled { name: String, payload: String },
    /// An outgoing network request.
    Request {
        request_id: String,
        url: String,
        frame_id: Option<String>,
        resource_type: Option<String>,
        /// URL this request was redirected away from, when part of a
        /// redirect chain.
        redirect_from: Option<String>,
        is_document: bool,
    },
    /// Raw response headers; carries the bundled `Set-Cookie` value when
    /// one was present.
    ResponseHeaders {
        request_id: String,
        set_cookie: Option<String>,
    },
    WebSocketCreated {
        request_id: String,
        url: String,
    },
    WebSocketFrame {
        request_id: String,
        timestamp: f64,
        outgoing: bool,
        payload: String,
    },
    Console {
        text: String,
    },
    FrameNavigated {
        frame_id: String,
        url: String,
    },
    Load,
}

impl ProbeEvent {
    pub fn from_transport(event: &TransportEvent) -> Option<Self> {
        let params = &event.params;
        match event.method.as_str() {
            "Runtime.bindingCalled" => Some(ProbeEvent::BindingCalled {
                name: str_field(params, "/name")?,
                payload: str_field(params, "/payload")?,
            }),
            "Network.requestWillBeSent" => Some(ProbeEvent::Request {
                request_id: str_field(params, "/requestId")?,
                url: str_field(params, "/request/url")?,
                frame_id: str_field(params, "/frameId"),
                resource_type: str_field(params, "/type"),
                redirect_from: str_field(params, "/redirectResponse/url"),
                is_document: params.pointer("/type").and_then(Value::as_str) == Some("Document"),
            }),
            "Network.responseReceivedExtraInfo" => Some(ProbeEvent::ResponseHeaders {
                request_id: str_field(params, "/requestId")?,
                set_cookie: header_value(params.pointer("/headers"), "set-cookie"),
            }),
            "Network.webSocketCreated" => Some(ProbeEvent::WebSocketCreated {
                request_id: str_field(params, "/requestId")?,
                url: str_field(params, "/url")?,
            }),
            "Network.webSocketFrameSent" | "Network.webSocketFrameReceived" => {
                Some(ProbeEvent::WebSocketFrame {
                    request_id: str_field(params, "/requestId")?,
                    timestamp: params
                        .pointer("/timestamp")
                        .and_then(Value::as_f64)
                        .unwrap_or_default(),
                    outgoing: event.method == "Network.webSocketFrameSent",
                    payload: str_field(params, "/response/payloadData").unwrap_or_default(),
                })
            }
            "Runtime.consoleAPICalled" => {
                let text = params
                    .pointer("/args")
                    .and_then(Value::as_array)
                    .map(|args| {
                        args.iter()
                            .filter_map(|arg| arg.pointer("/value"))
                            .map(|value| match value {
                                Value::String(text) => text.clone(),
                                other => other.to_string(),
                            })
                            .collect::<Vec<_>>()
                            .join(" ")
                    })
                    .unwrap_or_default();
                Some(ProbeEvent::Console { text })
            }
            "Page.frameNavigated" => Some(ProbeEvent::FrameNavigated {
                frame_id: str_field(params, "/frame/id")?,
                url: str_field(params, "/frame/url")?,
            }),
            "Page.loadEventFired" => Some(ProbeEvent::Load),
            _ => None,
        }
    }
}

fn str_field(params: &Value, pointer: &str) -> Option<String> {
    params
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Case-insensitive header lookup in a CDP headers object.
fn header_value(headers: Option<&Value>, name: &str) -> Option<String> {
    let map = headers?.as_object()?;
    map.iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, value)| value.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transport(method: &str, params: Value) -> TransportEvent {
        TransportEvent {
            method: method.to_string(),
            params,
            session_id: None,
        }
    }

    #[test]
    fn decodes_binding_calls() {
        let event = transport(
            "Runtime.bindingCalled",
            json!({"name": "reportEvent", "payload": "{}"}),
        );
        match ProbeEvent::from_transport(&event) {
            Some(ProbeEvent::BindingCalled { name, payload }) => {
                assert_eq!(name, "reportEvent");
                assert_eq!(payload, "{}");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn decodes_requests_with_redirects() {
        let event = transport(
            "Network.requestWillBeSent",
            json!({
                "requestId": "1",
                "frameId": "f1",
                "type": "Document",
                "request": {"url": "https://example.com/"},
                "redirectResponse": {"url": "http://example.com/"},
            }),
        );
        match ProbeEvent::from_transport(&event) {
            Some(ProbeEvent::Request {
                url,
                redirect_from,
                is_document,
                ..
            }) => {
                assert_eq!(url, "https://example.com/");
                assert_eq!(redirect_from.as_deref(), Some("http://example.com/"));
                assert!(is_document);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn finds_set_cookie_headers_case_insensitively() {
        let event = transport(
            "Network.responseReceivedExtraInfo",
            json!({"requestId": "1", "headers": {"Set-Cookie": "a=1\nb=2"}}),
        );
        match ProbeEvent::from_transport(&event) {
            Some(ProbeEvent::ResponseHeaders { set_cookie, .. }) => {
                assert_eq!(set_cookie.as_deref(), Some("a=1\nb=2"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_methods_are_ignored() {
        let event = transport("Inspector.detached", json!({}));
        assert!(ProbeEvent::from_transport(&event).is_none());
    }
}
