pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::questionnaire::handlers;
use crate::state::AppState;

pub const TEMPLATES_PREFIX: &str = "/api/v1/questionnaire-templates";

pub fn build_router(state: AppState) -> Router {
    let import_limit = DefaultBodyLimit::max(state.config.import_max_bytes);

    let import = Router::new()
        .route("/validate", post(handlers::handle_import_validate))
        .route("/execute", post(handlers::handle_import_execute))
        .layer(import_limit);

    let templates = Router::new()
        .route("/", get(handlers::handle_list).post(handlers::handle_create))
        .route("/filtered", get(handlers::handle_list_filtered))
        .nest("/import", import)
        // Question versions
        .route(
            "/questions/:q/history",
            get(handlers::handle_question_history),
        )
        .route(
            "/questions/:q/:qv",
            get(handlers::handle_get_question_version),
        )
        // Template versions
        .route("/:name/latest", get(handlers::handle_get_latest))
        .route("/:name/versions", get(handlers::handle_list_versions))
        .route(
            "/:name/history/:entity_type",
            get(handlers::handle_version_history),
        )
        .route(
            "/:name/:version",
            get(handlers::handle_get)
                .put(handlers::handle_update)
                .delete(handlers::handle_delete),
        )
        .route("/:name/:version/publish", post(handlers::handle_publish))
        .route("/:name/:version/restore", post(handlers::handle_restore))
        .route(
            "/:name/:version/duplicate",
            post(handlers::handle_duplicate),
        )
        .route(
            "/:name/:version/candidate",
            get(handlers::handle_candidate_view),
        )
        .route(
            "/:name/:version/submissions",
            post(handlers::handle_start_submission),
        )
        .route(
            "/:name/:version/sections/:order/questions/:q/active/:qv",
            post(handlers::handle_set_active_question_version),
        );

    Router::new()
        .route("/health", get(health::health_handler))
        .nest(TEMPLATES_PREFIX, templates)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::cache::HistoryCache;
    use crate::config::{Config, StoreBackend};
    use crate::questionnaire::memory::MemoryStore;
    use crate::questionnaire::service::TemplateService;

    fn app() -> Router {
        let config = Config {
            store_backend: StoreBackend::Memory,
            database_url: None,
            redis_url: None,
            port: 0,
            rust_log: "info".into(),
            import_max_bytes: 1024 * 1024,
        };
        let service = TemplateService::new(Arc::new(MemoryStore::new()), HistoryCache::local());
        build_router(AppState::new(service, config))
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        app.clone().oneshot(builder.body(body).unwrap()).await.unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn template(name: &str) -> Value {
        json!({
            "name": name,
            "version": 1,
            "templateType": "Form",
            "status": "Draft",
            "sections": [{
                "order": 1,
                "title": "Intro",
                "questions": [{
                    "order": 1,
                    "questionType": "Radio",
                    "promptText": "Coffee or tea?",
                    "options": [
                        { "order": 1, "label": "Coffee" },
                        { "order": 2, "label": "Tea" }
                    ]
                }]
            }]
        })
    }

    fn multipart(fields: &[(&str, &str)], file: Option<&str>) -> (String, String) {
        let boundary = "XBOUNDARYX";
        let mut body = String::new();
        for (name, value) in fields {
            body.push_str(&format!(
                "--{boundary}\r\n\
                 Content-Disposition: form-data; name=\"{name}\"\r\n\r\n\
                 {value}\r\n"
            ));
        }
        if let Some(content) = file {
            body.push_str(&format!(
                "--{boundary}\r\n\
                 Content-Disposition: form-data; name=\"file\"; filename=\"import.csv\"\r\n\
                 Content-Type: text/csv\r\n\r\n\
                 {content}\r\n"
            ));
        }
        body.push_str(&format!("--{boundary}--\r\n"));
        (format!("multipart/form-data; boundary={boundary}"), body)
    }

    async fn post_import(
        app: &Router,
        path: &str,
        fields: &[(&str, &str)],
        file: Option<&str>,
    ) -> Response {
        let (content_type, body) = multipart(fields, file);
        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("{TEMPLATES_PREFIX}/import/{path}"))
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap();
        app.clone().oneshot(request).await.unwrap()
    }

    async fn get_template(app: &Router, path: &str) -> Response {
        send(app, Method::GET, &format!("{TEMPLATES_PREFIX}/{path}"), None).await
    }

    const IMPORT_HEADER: &str = "Scope,TemplateName,TemplateType,SectionOrder,SectionTitle,\
                                 QuestionOrder,QuestionType,QuestionTitle\nhint\n";

    fn import_sheet(name: &str) -> String {
        format!("{IMPORT_HEADER}CreateTemplate,{name},Form,1,Intro,1,Text,Your name?\n")
    }

    #[tokio::test]
    async fn test_health() {
        let response = send(&app(), Method::GET, "/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["service"], "questionnaire-api");
    }

    #[tokio::test]
    async fn test_create_get_and_latest() {
        let app = app();
        let response = send(&app, Method::POST, TEMPLATES_PREFIX, Some(template("Survey"))).await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = get_template(&app, "Survey/1").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let options = body["sections"][0]["questions"][0]["options"].as_array().unwrap();
        assert_eq!(options.len(), 2);

        let response = get_template(&app, "Survey/latest").await;
        assert_eq!(json_body(response).await["version"], 1);

        let response = get_template(&app, "Missing/1").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_duplicate_name_is_a_validation_error() {
        let app = app();
        send(&app, Method::POST, TEMPLATES_PREFIX, Some(template("Survey"))).await;
        let response = send(&app, Method::POST, TEMPLATES_PREFIX, Some(template("Survey"))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_publish_then_delete() {
        let app = app();
        send(&app, Method::POST, TEMPLATES_PREFIX, Some(template("Survey"))).await;

        let uri = format!("{TEMPLATES_PREFIX}/Survey/1/publish");
        let response = send(&app, Method::POST, &uri, None).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let uri = format!("{TEMPLATES_PREFIX}/Survey/1");
        let response = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(json_body(response).await["mode"], "Deleted");
    }

    #[tokio::test]
    async fn test_stale_row_version_conflicts() {
        let app = app();
        send(&app, Method::POST, TEMPLATES_PREFIX, Some(template("Survey"))).await;

        let mut body = template("ignored");
        body["rowVersion"] = json!(99);
        let uri = format!("{TEMPLATES_PREFIX}/Survey/1");
        let response = send(&app, Method::PUT, &uri, Some(body)).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_question_routes() {
        let app = app();
        send(&app, Method::POST, TEMPLATES_PREFIX, Some(template("Survey"))).await;
        let name = "survey_v1_coffee_or_tea";

        let response = get_template(&app, &format!("questions/{name}/1")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["promptText"], "Coffee or tea?");

        let response = get_template(&app, &format!("questions/{name}/history")).await;
        assert_eq!(json_body(response).await.as_array().unwrap().len(), 1);

        let response = get_template(&app, &format!("{name}/history/question")).await;
        assert_eq!(json_body(response).await[0]["version"], 1);
    }

    #[tokio::test]
    async fn test_import_requires_file() {
        let response = post_import(&app(), "validate", &[("scope", "CreateTemplate")], None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["message"], "File is required.");
    }

    #[tokio::test]
    async fn test_import_validate_and_execute() {
        let app = app();
        let sheet = "SectionOrder,SectionTitle,QuestionOrder,QuestionType,QuestionTitle\n\
                     hint\n\
                     1,Intro,1,Text,Your name?\n";
        let fields = [
            ("scope", "CreateTemplate"),
            ("templateName", "Imported"),
            ("templateType", "Form"),
        ];

        for path in ["validate", "execute"] {
            let response = post_import(&app, path, &fields, Some(sheet)).await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        let body = json_body(get_template(&app, "Imported/1").await).await;
        assert_eq!(body["sections"][0]["questions"][0]["promptText"], "Your name?");
    }

    #[tokio::test]
    async fn test_import_rejects_unparseable_form_values() {
        let app = app();
        let sheet = import_sheet("Typo");

        let fields = [("scope", "Replce")];
        let response = post_import(&app, "execute", &fields, Some(sheet.as_str())).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"]["message"], "Invalid scope 'Replce'.");

        let fields = [("templateVersion", "two")];
        let response = post_import(&app, "validate", &fields, Some(sheet.as_str())).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"]["message"], "Invalid templateVersion 'two'.");

        let fields = [("targetSectionOrder", "1.5")];
        let response = post_import(&app, "validate", &fields, Some(sheet.as_str())).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = get_template(&app, "Typo/1").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_import_form_fields_override_sheet() {
        let app = app();
        let sheet = import_sheet("FromSheet");
        let fields = [
            ("scope", " createtemplate "),
            ("templateName", "FromForm"),
            ("templateVersion", ""),
            ("title", "Form title"),
        ];

        let response = post_import(&app, "execute", &fields, Some(sheet.as_str())).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = get_template(&app, "FromForm/1").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["title"], "Form title");

        let response = get_template(&app, "FromSheet/1").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
