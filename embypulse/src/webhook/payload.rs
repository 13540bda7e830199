//! Emby webhook payload decoding.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::domain::{ItemKind, PlaybackAction, PlaybackEvent, PlaybackItem, RawLibraryEvent};
use crate::emby::MediaItem;
use crate::emby::models::PlayState;
use crate::{Error, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct WebhookPayload {
    event: String,
    item: Option<MediaItem>,
    user: Option<NamedRef>,
    session: Option<SessionRef>,
    playback_info: Option<PlaybackInfo>,
    server: Option<ServerRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct NamedRef {
    name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct SessionRef {
    device_name: Option<String>,
    client: Option<String>,
    remote_end_point: Option<String>,
    play_state: Option<PlayState>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct PlaybackInfo {
    position_ticks: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ServerRef {
    id: Option<String>,
}

/// What a webhook asks the service to do.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    Library(RawLibraryEvent),
    Playback(PlaybackEvent),
    /// Unhandled event name, or an item we do not notify about.
    Ignored(String),
}

/// Decode a webhook body: JSON, or a form whose `data` field holds the JSON.
pub fn decode(body: &[u8], content_type: Option<&str>, now: DateTime<Utc>) -> Result<WebhookEvent> {
    let is_form = content_type
        .map(|ct| ct.to_ascii_lowercase().contains("application/x-www-form-urlencoded"))
        .unwrap_or(false);

    let payload: WebhookPayload = if is_form {
        let data = url::form_urlencoded::parse(body)
            .find(|(key, _)| key == "data")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| Error::validation("form body has no data field"))?;
        serde_json::from_str(&data)?
    } else {
        serde_json::from_slice(body)?
    };

    Ok(interpret(payload, now))
}

fn interpret(payload: WebhookPayload, now: DateTime<Utc>) -> WebhookEvent {
    let event = payload.event.trim().to_ascii_lowercase();
    match event.as_str() {
        "library.new" | "item.added" => match payload.item {
            Some(item) if !item.id.is_empty() && item.kind().is_library_notifiable() => {
                let mut library_event = item.to_library_event(now);
                if library_event.server_id.is_none() {
                    library_event.server_id = payload.server.and_then(|s| s.id);
                }
                WebhookEvent::Library(library_event)
            }
            _ => WebhookEvent::Ignored(event),
        },
        "playback.start" => playback(PlaybackAction::Start, payload, now),
        "playback.stop" => playback(PlaybackAction::Stop, payload, now),
        _ => WebhookEvent::Ignored(event),
    }
}

fn playback(action: PlaybackAction, payload: WebhookPayload, now: DateTime<Utc>) -> WebhookEvent {
    let item = payload.item.unwrap_or_default();
    let session = payload.session.unwrap_or_default();
    let position_ticks = payload
        .playback_info
        .and_then(|p| p.position_ticks)
        .or_else(|| session.play_state.as_ref().and_then(|p| p.position_ticks));

    WebhookEvent::Playback(PlaybackEvent {
        action,
        user_name: payload
            .user
            .and_then(|u| u.name)
            .unwrap_or_else(|| "Unknown user".to_string()),
        device_name: session
            .device_name
            .unwrap_or_else(|| "Unknown device".to_string()),
        client: session.client.unwrap_or_else(|| "Emby".to_string()),
        remote_address: session.remote_end_point,
        position_ticks,
        server_id: payload.server.and_then(|s| s.id).or(item.server_id.clone()),
        item: PlaybackItem {
            id: Some(item.id.clone()).filter(|id| !id.is_empty()),
            name: if item.name.is_empty() {
                "Unknown item".to_string()
            } else {
                item.name.clone()
            },
            kind: match item.kind() {
                ItemKind::Other if item.series_name.is_some() => ItemKind::Episode,
                kind => kind,
            },
            series_name: item.series_name.clone(),
            season: item.parent_index_number,
            episode: item.index_number,
            run_time_ticks: item.run_time_ticks,
        },
        occurred_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    const EPISODE_ADDED: &str = r#"{
        "Title": "New episode",
        "Event": "library.new",
        "Item": {
            "Id": "101",
            "Name": "Pilot",
            "Type": "Episode",
            "SeriesId": "9",
            "SeriesName": "Severance",
            "ParentIndexNumber": 1,
            "IndexNumber": 1,
            "ImageTags": {"Primary": "abc"}
        },
        "Server": {"Id": "srv", "Name": "home"}
    }"#;

    #[test]
    fn test_library_event_from_json() {
        let event = decode(EPISODE_ADDED.as_bytes(), Some("application/json"), now()).unwrap();
        let WebhookEvent::Library(event) = event else {
            panic!("expected a library event");
        };
        assert_eq!(event.id, "101");
        assert_eq!(event.kind, ItemKind::Episode);
        assert_eq!(event.series_id.as_deref(), Some("9"));
        assert_eq!(event.image_tag.as_deref(), Some("abc"));
        assert_eq!(event.server_id.as_deref(), Some("srv"));
        assert_eq!(event.received_at, now());
    }

    #[test]
    fn test_library_event_from_form() {
        let body: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("data", EPISODE_ADDED)
            .finish();
        let event = decode(
            body.as_bytes(),
            Some("application/x-www-form-urlencoded; charset=utf-8"),
            now(),
        )
        .unwrap();
        assert!(matches!(event, WebhookEvent::Library(_)));
    }

    #[test]
    fn test_form_without_data_is_rejected() {
        let err = decode(b"other=1", Some("application/x-www-form-urlencoded"), now()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_unsupported_items_are_ignored() {
        let body = r#"{"Event":"item.added","Item":{"Id":"5","Name":"Album","Type":"MusicAlbum"}}"#;
        assert_eq!(
            decode(body.as_bytes(), None, now()).unwrap(),
            WebhookEvent::Ignored("item.added".to_string())
        );

        let body = r#"{"Event":"user.authenticated"}"#;
        assert_eq!(
            decode(body.as_bytes(), None, now()).unwrap(),
            WebhookEvent::Ignored("user.authenticated".to_string())
        );
    }

    #[test]
    fn test_playback_event() {
        let body = r#"{
            "Event": "Playback.Start",
            "User": {"Name": "alice"},
            "Item": {"Id": "7", "Name": "Dune", "Type": "Movie", "RunTimeTicks": 1000},
            "Session": {"DeviceName": "TV", "Client": "Emby Theater", "RemoteEndPoint": "203.0.113.5",
                        "PlayState": {"PositionTicks": 100}},
            "PlaybackInfo": {"PositionTicks": 250}
        }"#;
        let WebhookEvent::Playback(event) = decode(body.as_bytes(), None, now()).unwrap() else {
            panic!("expected a playback event");
        };
        assert_eq!(event.action, PlaybackAction::Start);
        assert_eq!(event.user_name, "alice");
        assert_eq!(event.client, "Emby Theater");
        assert_eq!(event.position_ticks, Some(250));
        assert_eq!(event.item.kind, ItemKind::Movie);
        assert_eq!(event.remote_address.as_deref(), Some("203.0.113.5"));
    }

    #[test]
    fn test_playback_position_falls_back_to_session() {
        let body = r#"{"Event":"playback.stop","Item":{"Id":"7","Name":"Dune","Type":"Movie"},
                       "Session":{"PlayState":{"PositionTicks":100}}}"#;
        let WebhookEvent::Playback(event) = decode(body.as_bytes(), None, now()).unwrap() else {
            panic!("expected a playback event");
        };
        assert_eq!(event.action, PlaybackAction::Stop);
        assert_eq!(event.position_ticks, Some(100));
        assert_eq!(event.user_name, "Unknown user");
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(decode(b"not json", Some("application/json"), now()).is_err());
    }
}
