pub mod events;
pub mod health;
pub mod requests;
pub mod settings;

use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::openapi::Components;
use utoipa::{Modify, OpenApi};

use self::requests::RequestDoc;
use self::settings::SettingsDoc;

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let mut components = openapi.components.clone().unwrap_or(Components::default());
        components.add_security_scheme(
            "bearerAuth",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
        openapi.components = Some(components);
    }
}

#[derive(OpenApi)]
#[openapi(paths(events::request_events), modifiers(&SecurityAddon))]
pub struct EventsDoc;

/// All documented routes, merged.
pub fn openapi() -> utoipa::openapi::OpenApi {
    EventsDoc::openapi()
        .merge_from(RequestDoc::openapi())
        .merge_from(SettingsDoc::openapi())
}
