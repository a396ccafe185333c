use crate::config::Config;
use crate::questionnaire::import::TemplateImporter;
use crate::questionnaire::service::TemplateService;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub templates: TemplateService,
    pub importer: TemplateImporter,
    pub config: Config,
}

impl AppState {
    pub fn new(templates: TemplateService, config: Config) -> Self {
        Self {
            importer: TemplateImporter::new(templates.clone()),
            templates,
            config,
        }
    }
}
