use std::collections::HashMap;

use super::*;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |name| map.get(name).cloned()
}

#[test]
fn reads_all_variables() {
    let credentials = Credentials::from_lookup(lookup_from(&[
        (INDEX_URL_ENV, "https://in01-abc.zillizcloud.com"),
        (INDEX_API_KEY_ENV, "index-key"),
        (LLM_URL_ENV, "https://llm.example.com/v1"),
        (LLM_API_KEY_ENV, "llm-key"),
        (EMBEDDING_URL_ENV, "http://gpu-box:11434"),
    ]))
    .expect("should read credentials");

    let (url, key) = credentials.require_index().expect("index credentials");
    assert_eq!(url.host_str(), Some("in01-abc.zillizcloud.com"));
    assert_eq!(key.expose(), "index-key");

    let (llm_url, llm_key) = credentials.require_llm().expect("llm credentials");
    assert_eq!(llm_url.as_str(), "https://llm.example.com/v1");
    assert_eq!(llm_key.expose(), "llm-key");

    assert_eq!(
        credentials.embedding_url.map(|u| u.to_string()),
        Some("http://gpu-box:11434/".to_string())
    );
}

#[test]
fn missing_variables_are_reported_by_name() {
    let credentials =
        Credentials::from_lookup(lookup_from(&[(INDEX_URL_ENV, "https://index.example.com")]))
            .expect("optional variables may be absent");

    match credentials.require_index() {
        Err(ConfigError::MissingVariable(name)) => assert_eq!(name, INDEX_API_KEY_ENV),
        other => panic!("unexpected result: {:?}", other.map(|(u, _)| u.clone())),
    }

    match credentials.require_llm() {
        Err(ConfigError::MissingVariable(name)) => assert_eq!(name, LLM_API_KEY_ENV),
        other => panic!("unexpected result: {:?}", other.map(|(u, _)| u.clone())),
    }
}

#[test]
fn blank_values_count_as_missing() {
    let credentials = Credentials::from_lookup(lookup_from(&[
        (INDEX_URL_ENV, "https://index.example.com"),
        (INDEX_API_KEY_ENV, "   "),
    ]))
    .expect("should read credentials");

    assert!(credentials.index_api_key.is_none());
    assert!(credentials.require_index().is_err());
}

#[test]
fn llm_url_defaults_to_openai() {
    let credentials = Credentials::from_lookup(lookup_from(&[])).expect("should read defaults");
    assert_eq!(credentials.llm_url.as_str(), "https://api.openai.com/v1");
}

#[test]
fn invalid_url_is_rejected() {
    let result = Credentials::from_lookup(lookup_from(&[(INDEX_URL_ENV, "not a url")]));
    assert!(matches!(
        result,
        Err(ConfigError::InvalidVariable(INDEX_URL_ENV, _))
    ));
}

#[test]
fn secrets_are_redacted() {
    let credentials = Credentials::from_lookup(lookup_from(&[
        (INDEX_URL_ENV, "https://index.example.com"),
        (INDEX_API_KEY_ENV, "super-secret-index-key"),
        (LLM_API_KEY_ENV, "super-secret-llm-key"),
    ]))
    .expect("should read credentials");

    let debug = format!("{:?}", credentials);
    assert!(!debug.contains("super-secret"));
    assert!(debug.contains("Secret(***)"));

    let key = credentials.index_api_key.as_ref().expect("key present");
    assert_eq!(format!("{}", key), "***");
    assert_eq!(key.expose(), "super-secret-index-key");
}

#[test]
fn dropping_a_clone_leaves_the_original_intact() {
    let original = Secret::new("sk-garden".to_string());
    let copy = original.clone();
    assert_eq!(copy, original);
    drop(copy);
    assert_eq!(original.expose(), "sk-garden");
}
