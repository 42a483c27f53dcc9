use crate::config::{
    find_grove_path, resolve_model, GroveConfig, DEFAULT_MODEL, MODEL_TYPE_LITE, MODEL_TYPE_NONE,
    SUGGESTED_MODELS,
};
use crate::error::{Error, Result};

const MODEL_KEYS: [&str; 2] = ["embedding_model", "rerank_model"];

/// Run the config command
pub fn run_config(key: Option<&str>, value: Option<&str>, list_models: bool) -> Result<()> {
    if list_models {
        print_models();
        return Ok(());
    }

    let grove_path = find_grove_path().ok_or(Error::NotInitialized)?;
    let mut config = GroveConfig::new(grove_path);

    match (key, value) {
        (None, None) => {
            println!("Current configuration:\n");

            let (model_name, model_type) = config.get_resolved_model();
            println!("  embedding_model: {}", config.embedding_model());
            if model_name != config.embedding_model() {
                println!("    -> {}", model_name);
            }
            println!("    type: {}", model_type);
            println!("  rerank_model: {}", config.rerank_model());
            println!("  embedding_socket: {}", config.embedding_socket().display());
            println!("  rerank_cache_ttl_secs: {}", config.rerank_cache_ttl().as_secs());
            println!("  provider_timeout_secs: {}", config.provider_timeout().as_secs());
            println!("  crystallize_min_count: {}", config.crystallize_min_count());
        }
        (Some(k), None) => {
            if MODEL_KEYS.contains(&k) {
                let model = config.get(k).unwrap_or_else(|| DEFAULT_MODEL.to_string());
                let (model_name, model_type) = resolve_model(&model);
                println!("{}: {}", k, model);
                println!("  -> {}", model_name);
                println!("  type: {}", model_type);
            } else if let Some(v) = config.get(k) {
                println!("{}: {}", k, v);
            } else {
                println!("{}: (not set)", k);
            }
        }
        (Some(k), Some(v)) => {
            if MODEL_KEYS.contains(&k) {
                let (model_name, model_type) = resolve_model(v);
                match model_type.as_str() {
                    MODEL_TYPE_LITE => println!("Setting {} to lite (n-gram hashing)", k),
                    MODEL_TYPE_NONE => println!("Disabling {}", k),
                    _ => {
                        println!("Setting {} to: {}", k, model_name);
                        println!("  type: {}", model_type);
                        println!("\nThe embedding server must serve this model.");
                    }
                }
            }
            config.set(k, v)?;
            println!("Set {} = {}", k, v);
        }
        (None, Some(_)) => {
            return Err(Error::Invalid("Key required when setting a value".to_string()));
        }
    }

    Ok(())
}

fn print_models() {
    let current = find_grove_path()
        .map(|p| GroveConfig::new(p).embedding_model())
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    println!("Available embedding models:\n");
    println!("{:2} {:12} {:10} {}", "", "Alias", "Size", "Description");
    println!("{}", "-".repeat(60));

    for model in SUGGESTED_MODELS {
        let marker = if model.alias == current || model.name == current {
            " *"
        } else {
            "  "
        };

        println!("{} {:12} {:10} {}", marker, model.alias, model.size, model.description);
    }

    println!("\n* = currently configured");
    println!("\nSet model with: grove config embedding_model <alias>");
}
