// Dockerfile generation for sandbox language images
use gauntlet_common::languages::LanguageConfig;

/// Render the Dockerfile for a language image built on `base_image`.
///
/// The sandbox runs as uid 65534 with a read-only root and writes only to
/// the /sandbox tmpfs, so images need `sh` and `base64` and nothing else.
pub fn render_dockerfile(lang: &LanguageConfig, base_image: &str) -> String {
    let extras = language_extras(&lang.name);
    format!(
        r#"# GENERATED BY gauntlet-cli - DO NOT EDIT
# {name} {version} sandbox image
FROM {base}

ENV LANGUAGE={name}{extras}

# The sandbox decodes sources with sh + base64
RUN command -v sh >/dev/null && command -v base64 >/dev/null

WORKDIR /sandbox

USER 65534:65534
"#,
        name = lang.name,
        version = lang.version,
        base = base_image,
        extras = extras,
    )
}

fn language_extras(name: &str) -> &'static str {
    match name {
        "python" => " \\\n    PYTHONUNBUFFERED=1 \\\n    PYTHONDONTWRITEBYTECODE=1",
        "java" => " \\\n    JAVA_TOOL_OPTIONS=\"-XX:+UseSerialGC -XX:TieredStopAtLevel=1\"",
        "javascript" | "node" => " \\\n    NODE_ENV=production",
        "rust" => " \\\n    CARGO_HOME=/sandbox/.cargo",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lang(name: &str) -> LanguageConfig {
        LanguageConfig {
            name: name.to_string(),
            version: "1.0".to_string(),
            image: format!("gauntlet-{}:1.0", name),
            source_file: "main.x".to_string(),
            compile_command: None,
            run_command: "./main".to_string(),
            cpu_limit: 0.5,
        }
    }

    #[test]
    fn test_python_dockerfile() {
        let dockerfile = render_dockerfile(&lang("python"), "python:3.12-slim");
        assert!(dockerfile.starts_with("# GENERATED BY gauntlet-cli"));
        assert!(dockerfile.contains("FROM python:3.12-slim\n"));
        assert!(dockerfile.contains("PYTHONUNBUFFERED=1"));
        assert!(dockerfile.contains("USER 65534:65534"));
    }

    #[test]
    fn test_generic_dockerfile_has_no_extras() {
        let dockerfile = render_dockerfile(&lang("haskell"), "haskell:9");
        assert!(dockerfile.contains("ENV LANGUAGE=haskell\n"));
        assert!(dockerfile.contains("WORKDIR /sandbox"));
    }
}
