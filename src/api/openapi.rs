use super::handlers::{forms, health, schemas, users};
use utoipa::openapi::{
    OpenApiBuilder, Tag,
    info::{ContactBuilder, InfoBuilder, LicenseBuilder},
    security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Handlers sharing a path are registered in the same `routes!` call.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(document())
        .routes(routes!(health::health))
        .routes(routes!(users::register))
        .routes(routes!(users::login, users::current_user))
        .routes(routes!(users::change_password, users::delete_account))
        .routes(routes!(forms::list_forms, forms::create_form))
        .routes(routes!(forms::my_forms))
        .routes(routes!(
            forms::get_form,
            forms::update_form,
            forms::delete_form
        ))
        .routes(routes!(schemas::list_schemas, schemas::create_schema))
        .routes(routes!(
            schemas::get_schema,
            schemas::update_schema,
            schemas::delete_schema
        ));

    let openapi = router.get_openapi_mut();
    openapi.tags = Some(vec![
        tag("users", "Registration, login and account management"),
        tag("forms", "Forms, owned by the user who created them"),
        tag("schemas", "Versioned schemas of a form"),
        tag("health", "Service and database status"),
    ]);
    openapi
        .components
        .get_or_insert_with(Default::default)
        .add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );

    router
}

fn tag(name: &str, description: &str) -> Tag {
    let mut tag = Tag::new(name);
    tag.description = Some(description.to_string());
    tag
}

/// Document info comes from the package manifest; the first author is the contact.
fn document() -> utoipa::openapi::OpenApi {
    let contact = env!("CARGO_PKG_AUTHORS")
        .split(':')
        .find_map(Maintainer::parse)
        .map(|maintainer| {
            ContactBuilder::new()
                .name(maintainer.name)
                .email(maintainer.email)
                .build()
        });
    let license = non_empty(env!("CARGO_PKG_LICENSE")).map(|spdx| {
        LicenseBuilder::new()
            .name(spdx)
            .identifier(Some(spdx))
            .build()
    });

    let info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(non_empty(env!("CARGO_PKG_DESCRIPTION")))
        .contact(contact)
        .license(license)
        .build();

    OpenApiBuilder::new().info(info).build()
}

/// One Cargo author entry: `Name <email>`, a bare name or `<email>`.
#[derive(Debug, PartialEq, Eq)]
struct Maintainer<'a> {
    name: Option<&'a str>,
    email: Option<&'a str>,
}

impl<'a> Maintainer<'a> {
    fn parse(entry: &'a str) -> Option<Self> {
        let (name, email) = match entry.split_once('<') {
            Some((name, rest)) => (name, rest.trim_end().trim_end_matches('>')),
            None => (entry, ""),
        };
        let maintainer = Self {
            name: non_empty(name),
            email: non_empty(email),
        };
        (maintainer.name.is_some() || maintainer.email.is_some()).then_some(maintainer)
    }
}

fn non_empty(value: &str) -> Option<&str> {
    Some(value.trim()).filter(|value| !value.is_empty())
}
