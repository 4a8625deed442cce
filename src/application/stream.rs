//! Datastar SSE responses used to patch fragments of a rendered page in place.

use std::convert::Infallible;

use async_stream::stream;
use axum::response::{
    IntoResponse, Response,
    sse::{Event, Sse},
};
use datastar::prelude::{ElementPatchMode, PatchElements};

/// Ordered list of patches delivered as one short-lived SSE response.
#[derive(Default)]
pub struct PatchStream {
    events: Vec<Event>,
}

impl PatchStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap the element matching `selector` for `html`.
    pub fn replace(mut self, selector: &str, html: String) -> Self {
        self.events.push(
            PatchElements::new(html)
                .selector(selector)
                .mode(ElementPatchMode::Outer)
                .write_as_axum_sse_event(),
        );
        self
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl IntoResponse for PatchStream {
    fn into_response(self) -> Response {
        let events = self.events;
        let body = stream! {
            for event in events {
                yield Ok::<Event, Infallible>(event);
            }
        };
        Sse::new(body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::CONTENT_TYPE;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn patches_are_streamed_in_order() {
        let patches = PatchStream::new()
            .replace("#like-1", "<button id=\"like-1\">2</button>".to_string())
            .replace("#like-2", "<button id=\"like-2\">0</button>".to_string());
        assert_eq!(patches.len(), 2);

        let response = patches.into_response();
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert_eq!(text.matches("datastar-patch-elements").count(), 2);
        let first = text.find("#like-1").expect("first patch");
        let second = text.find("#like-2").expect("second patch");
        assert!(first < second);
    }
}
