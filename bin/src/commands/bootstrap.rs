use crate::cli::BootstrapArgs;
use anyhow::{Context, Result};
use std::io::Write;
use weft_runtime::{bootstrap, DirModule, ModuleDescriptor, StyleWait};

/// Render the bootstrap page for the module in `args` into `out`.
pub fn render(args: &BootstrapArgs, out: &mut impl Write) -> Result<()> {
    let module = DirModule::open(&args.module)
        .with_context(|| format!("Failed to open module at {}", args.module.display()))?;
    let styles = StyleWait::new(module.style_resources(), args.module_base.clone());
    let boot = bootstrap::render(&module, &args.module_base, "", &styles)
        .context("Failed to read host page")?;
    out.write_all(boot.html.as_bytes())?;
    Ok(())
}

pub fn handle(args: BootstrapArgs) -> Result<()> {
    render(&args, &mut std::io::stdout().lock())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn renders_module_from_disk() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("module.toml"),
            "id = \"com.example.Mail\"\nruntime_version = \"2.2\"\nstylesheets = [\"Mail.css\"]\n",
        )
        .unwrap();
        fs::create_dir(dir.path().join("public")).unwrap();
        fs::write(dir.path().join("public/Mail.css"), "body{}").unwrap();

        let args = BootstrapArgs {
            module: dir.path().to_path_buf(),
            module_base: "/0/".to_string(),
        };
        let mut out = Vec::new();
        render(&args, &mut out).unwrap();
        let html = String::from_utf8(out).unwrap();

        assert!(html.starts_with("<!doctype html>\n"));
        assert!(html.contains("<title>Mail</title>"));
        assert!(html.contains("href='Mail.css'"));
        assert!(html.contains("weft__wait_stylesheet_Mail"));
    }

    #[test]
    fn missing_module_is_an_error() {
        let dir = tempdir().unwrap();
        let args = BootstrapArgs {
            module: dir.path().join("nope"),
            module_base: "/0/".to_string(),
        };
        let err = render(&args, &mut Vec::new()).unwrap_err();
        assert!(err.to_string().contains("Failed to open module"));
    }
}
