use crate::error::*;
use crate::models::{GenerateParams, StoredFile};
use crate::storage::TempFileStore;

pub const PARAM_HEADER: &str = "questionHeader";
pub const PARAM_DESCRIPTION: &str = "questionDescription";
pub const PARAM_API_KEY: &str = "apiKey";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedParams {
    pub header: String,
    pub description: String,
    pub api_key: String,
    pub model_name: String,
    pub declared_files: Vec<String>,
}

/// Check the required parameters and apply defaults.
///
/// Empty values count as missing. The error names every missing parameter,
/// not just the first.
pub fn validate_params(params: GenerateParams, default_model: &str) -> Result<ValidatedParams> {
    let header = non_empty(params.question_header);
    let description = non_empty(params.question_description);
    let api_key = non_empty(params.api_key);

    match (header, description, api_key) {
        (Some(header), Some(description), Some(api_key)) => Ok(ValidatedParams {
            header,
            description,
            api_key,
            model_name: non_empty(params.model_name).unwrap_or_else(|| default_model.to_string()),
            declared_files: split_filenames(params.uploaded_files.as_deref()),
        }),
        (header, description, api_key) => {
            let missing: Vec<&str> = [
                (header.is_none(), PARAM_HEADER),
                (description.is_none(), PARAM_DESCRIPTION),
                (api_key.is_none(), PARAM_API_KEY),
            ]
            .into_iter()
            .filter_map(|(absent, name)| absent.then_some(name))
            .collect();
            Err(AppError::missing_parameters(&missing))
        }
    }
}

pub fn split_filenames(raw: Option<&str>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Keep the declared files still present in scratch storage.
///
/// A partial match proceeds with the subset; only a non-empty declaration
/// with nothing on disk is rejected.
pub async fn resolve_files(store: &TempFileStore, declared: &[String]) -> Result<Vec<StoredFile>> {
    let found = store.resolve(declared).await;

    if !declared.is_empty() && found.is_empty() {
        return Err(AppError::files_not_found(declared));
    }
    if found.len() < declared.len() {
        log::debug!(
            "Proceeding with {} of {} declared files",
            found.len(),
            declared.len()
        );
    }
    Ok(found)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
