// tests/config_loading.rs
// Fatal configuration errors and self-contained inline TOML configs.

use serial_test::serial;
use std::env;
use std::fs;

use taxonomy_reconciler::report::MemorySink;
use taxonomy_reconciler::rules::ENV_RULES_CONFIG_PATH;
use taxonomy_reconciler::taxonomy::ENV_TAXONOMY_CONFIG_PATH;
use taxonomy_reconciler::{
    engine_from_env, CatalogItem, DecisionKind, Engine, InMemoryStore, RuleBook, RunConfig, Taxonomy,
};

const TINY_TAXONOMY: &str = r#"
version = "tiny-1"

[categories.calzado]
label = "Calzado"
subcategories = ["botas", "tenis", "otros_calzado"]

[categories.pantalones]
label = "Pantalones"
subcategories = ["jeans", "otros_pantalones"]
"#;

const TINY_RULES: &str = r#"
version = "tiny-r1"

[[detectors]]
id = "pants"
group = "apparel"
category = "pantalones"
confidence = 0.9
reason = "pants keyword"
words = ["pantalon", "jean"]

[[detectors]]
id = "boots"
group = "footwear"
category = "calzado"
subcategory = "botas"
confidence = 0.9
reason = "boot keyword"
words = ["bota", "botas"]
exclude_phrases = ["bota recta"]

[[subcategories.calzado.rules]]
key = "tenis"
confidence = 0.92
reason = "sneakers"
words = ["tenis"]

[[subcategories.calzado.rules]]
key = "otros_calzado"
confidence = 0.6
reason = "generic footwear"
fallback = true

[[subcategories.pantalones.rules]]
key = "jeans"
confidence = 0.92
reason = "denim"
words = ["jean", "jeans"]

[[subcategories.pantalones.rules]]
key = "otros_pantalones"
confidence = 0.6
reason = "generic pants"
fallback = true

[[legacy]]
category = "zapatos"
target = "calzado"
confidence = 0.7
"#;

fn clear_env() {
    env::remove_var(ENV_TAXONOMY_CONFIG_PATH);
    env::remove_var(ENV_RULES_CONFIG_PATH);
}

#[serial]
#[test]
fn missing_taxonomy_is_fatal() {
    clear_env();
    env::set_var(ENV_TAXONOMY_CONFIG_PATH, "/definitely/not/here/taxonomy.toml");
    let err = engine_from_env(RunConfig::default()).unwrap_err();
    clear_env();
    assert!(format!("{err:#}").contains("taxonomy config unavailable"), "{err:#}");
}

#[serial]
#[test]
fn empty_taxonomy_is_fatal() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("taxonomy.toml");
    fs::write(&path, "version = \"x\"\n[categories]\n").unwrap();
    env::set_var(ENV_TAXONOMY_CONFIG_PATH, path.display().to_string());
    let err = engine_from_env(RunConfig::default()).unwrap_err();
    clear_env();
    assert!(format!("{err:#}").contains("no categories"), "{err:#}");
}

#[serial]
#[test]
fn rule_book_that_does_not_fit_the_taxonomy_is_fatal() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let tax = dir.path().join("taxonomy.toml");
    let rules = dir.path().join("rules.toml");
    fs::write(&tax, TINY_TAXONOMY).unwrap();
    // bundled-style book references categories the tiny tree lacks
    fs::write(&rules, include_str!("../config/rules.toml")).unwrap();
    env::set_var(ENV_TAXONOMY_CONFIG_PATH, tax.display().to_string());
    env::set_var(ENV_RULES_CONFIG_PATH, rules.display().to_string());

    let err = engine_from_env(RunConfig::default()).unwrap_err();
    clear_env();
    let msg = format!("{err:#}");
    assert!(msg.contains("rule book validation failed"), "{msg}");
    assert!(msg.contains("is not canonical"), "{msg}");
}

#[serial]
#[test]
fn env_paths_load_inline_configs() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let tax = dir.path().join("taxonomy.toml");
    let rules = dir.path().join("rules.toml");
    fs::write(&tax, TINY_TAXONOMY).unwrap();
    fs::write(&rules, TINY_RULES).unwrap();
    env::set_var(ENV_TAXONOMY_CONFIG_PATH, tax.display().to_string());
    env::set_var(ENV_RULES_CONFIG_PATH, rules.display().to_string());

    let engine = engine_from_env(RunConfig::default()).unwrap();
    clear_env();
    assert_eq!(engine.resolver().rule_version(), "tiny-r1");
    assert_eq!(engine.resolver().taxonomy().version, "tiny-1");
}

#[tokio::test]
async fn tiny_config_runs_end_to_end() {
    let tax = Taxonomy::from_toml_str(TINY_TAXONOMY).unwrap();
    let book = RuleBook::from_toml_str(TINY_RULES).unwrap();
    let engine = Engine::new(
        tax,
        &book,
        RunConfig {
            seed: "s".into(),
            ..RunConfig::default()
        },
    )
    .unwrap();

    let store = InMemoryStore::new(vec![
        CatalogItem::new("1", "Pantalón bota recta").with_category(Some("zapatos"), None),
        CatalogItem::new("2", "Botas de invierno").with_category(Some("zapatos"), None),
        CatalogItem::new("3", "Modelo 9").with_category(Some("zapatos"), None),
        CatalogItem::new("4", "Modelo 9").with_category(Some("juguetes"), None),
    ]);
    let out = engine.run(&store, &MemorySink::new()).await.unwrap();
    let to: Vec<_> = out
        .decisions
        .iter()
        .map(|d| (d.kind, d.to_category.as_deref().unwrap_or("")))
        .collect();
    assert_eq!(
        to,
        vec![
            (DecisionKind::RemapCategory, "pantalones"),
            (DecisionKind::RemapCategory, "calzado"),
            (DecisionKind::RemapCategory, "calzado"),
            (DecisionKind::Keep, "juguetes"),
        ]
    );
    assert_eq!(out.decisions[1].to_subcategory.as_deref(), Some("botas"));
    assert_eq!(out.decisions[2].to_subcategory.as_deref(), Some("otros_calzado"));
}
