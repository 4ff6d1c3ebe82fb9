use std::collections::HashMap;

/// A named provider preset for OpenAI-compatible APIs.
#[derive(Debug, Clone, Copy)]
pub struct ProviderPreset {
    pub name: &'static str,
    pub default_base_url: &'static str,
    pub needs_api_key: bool,
    pub extra_headers: &'static [(&'static str, &'static str)],
}

const PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        name: "ollama",
        default_base_url: "http://localhost:11434/v1/chat/completions",
        needs_api_key: false,
        extra_headers: &[],
    },
    ProviderPreset {
        name: "groq",
        default_base_url: "https://api.groq.com/openai/v1/chat/completions",
        needs_api_key: true,
        extra_headers: &[],
    },
    ProviderPreset {
        name: "openrouter",
        default_base_url: "https://openrouter.ai/api/v1/chat/completions",
        needs_api_key: true,
        extra_headers: &[("X-Title", "Blogsmith")],
    },
    ProviderPreset {
        name: "together",
        default_base_url: "https://api.together.xyz/v1/chat/completions",
        needs_api_key: true,
        extra_headers: &[],
    },
    ProviderPreset {
        name: "fireworks",
        default_base_url: "https://api.fireworks.ai/inference/v1/chat/completions",
        needs_api_key: true,
        extra_headers: &[],
    },
    ProviderPreset {
        name: "cerebras",
        default_base_url: "https://api.cerebras.ai/v1/chat/completions",
        needs_api_key: true,
        extra_headers: &[],
    },
    ProviderPreset {
        name: "xai",
        default_base_url: "https://api.x.ai/v1/chat/completions",
        needs_api_key: true,
        extra_headers: &[],
    },
    ProviderPreset {
        name: "mistral",
        default_base_url: "https://api.mistral.ai/v1/chat/completions",
        needs_api_key: true,
        extra_headers: &[],
    },
    ProviderPreset {
        name: "perplexity",
        default_base_url: "https://api.perplexity.ai/chat/completions",
        needs_api_key: true,
        extra_headers: &[],
    },
    ProviderPreset {
        name: "deepseek",
        default_base_url: "https://api.deepseek.com/v1/chat/completions",
        needs_api_key: true,
        extra_headers: &[],
    },
];

/// Look up a provider preset by name.
pub fn get_preset(provider: &str) -> Option<ProviderPreset> {
    PRESETS.iter().find(|p| p.name == provider).copied()
}

/// Build extra headers from a preset + user config overrides.
pub fn build_extra_headers(
    preset: &ProviderPreset,
    user_headers: &HashMap<String, String>,
) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = preset
        .extra_headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    for (k, v) in user_headers {
        // User overrides take precedence
        if let Some(pos) = headers.iter().position(|(hk, _)| hk.eq_ignore_ascii_case(k)) {
            headers[pos].1 = v.clone();
        } else {
            headers.push((k.clone(), v.clone()));
        }
    }

    headers
}

/// List all known preset provider names.
pub fn all_preset_names() -> Vec<&'static str> {
    PRESETS.iter().map(|p| p.name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_listed_name_resolves() {
        for name in all_preset_names() {
            let preset = get_preset(name).unwrap();
            assert_eq!(preset.name, name);
            assert!(preset.default_base_url.ends_with("/chat/completions"));
        }
        assert!(get_preset("gemini").is_none());
    }

    #[test]
    fn test_ollama_needs_no_key() {
        assert!(!get_preset("ollama").unwrap().needs_api_key);
        assert!(get_preset("groq").unwrap().needs_api_key);
    }

    #[test]
    fn test_user_headers_override_preset() {
        let preset = get_preset("openrouter").unwrap();
        let mut user = HashMap::new();
        user.insert("x-title".to_string(), "My Blog".to_string());
        user.insert("HTTP-Referer".to_string(), "https://example.org".to_string());

        let headers = build_extra_headers(&preset, &user);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0], ("X-Title".to_string(), "My Blog".to_string()));
        assert!(headers.iter().any(|(k, _)| k == "HTTP-Referer"));
    }
}
