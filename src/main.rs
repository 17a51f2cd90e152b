use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use image::{DynamicImage, Rgba32FImage};
use texture_node_graph::{
    GpuBackend, GraphDocument, TextureGraphConfig, ValidatingBackend, WgpuBackend,
};

#[derive(Debug, Default, Clone)]
struct Cli {
    graph: Option<PathBuf>,
    output: Option<PathBuf>,
    config: Option<PathBuf>,
    size: Option<[u32; 2]>,
    dump_source: Option<PathBuf>,
    validate_only: bool,
}

const USAGE: &str = "supported: --graph <graph.json>, --output <file.png|file.exr>, --config <config.json>, \
                     --size <WxH>, --dump-source <file.comp>, --validate-only";

fn parse_size(v: &str) -> Result<[u32; 2]> {
    let (w, h) = v
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("invalid --size {v:?}, expected WxH"))?;
    let w: u32 = w.trim().parse().with_context(|| format!("invalid width in --size {v:?}"))?;
    let h: u32 = h.trim().parse().with_context(|| format!("invalid height in --size {v:?}"))?;
    if w == 0 || h == 0 {
        return Err(anyhow!("--size must be non-zero, got {v:?}"));
    }
    Ok([w, h])
}

fn parse_cli(args: &[String]) -> Result<Cli> {
    let mut cli = Cli::default();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        if flag == "--validate-only" {
            cli.validate_only = true;
            i += 1;
            continue;
        }
        let Some(v) = args.get(i + 1) else {
            return Err(anyhow!("missing value for {flag}"));
        };
        match flag {
            "--graph" => cli.graph = Some(PathBuf::from(v)),
            "--output" | "-o" => cli.output = Some(PathBuf::from(v)),
            "--config" => cli.config = Some(PathBuf::from(v)),
            "--size" => cli.size = Some(parse_size(v)?),
            "--dump-source" => cli.dump_source = Some(PathBuf::from(v)),
            other => return Err(anyhow!("unknown argument: {other} ({USAGE})")),
        }
        i += 2;
    }
    Ok(cli)
}

fn save_output(image: Rgba32FImage, path: &Path) -> Result<()> {
    let is_exr = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("exr"));
    let result = if is_exr {
        image.save(path)
    } else {
        DynamicImage::ImageRgba32F(image).to_rgba8().save(path)
    };
    result.with_context(|| format!("failed to save {}", path.display()))
}

fn render<B: GpuBackend>(
    doc: &GraphDocument,
    backend: B,
    config: TextureGraphConfig,
    cli: &Cli,
    base_dir: &Path,
) -> Result<()> {
    let mut graph = doc.instantiate(backend, config, base_dir)?;
    let report = graph.solve()?;
    tracing::info!(
        nodes = report.nodes,
        width = report.extent[0],
        height = report.extent[1],
        "solved texture graph"
    );
    if let Some(output) = &cli.output {
        save_output(graph.read_output()?, output)?;
        println!("[headless] saved: {}", output.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli(&args)?;
    let graph_path = cli
        .graph
        .clone()
        .ok_or_else(|| anyhow!("--graph is required ({USAGE})"))?;

    let mut config = match &cli.config {
        Some(path) => TextureGraphConfig::load(path)?,
        None => TextureGraphConfig::default(),
    };
    if let Some(size) = cli.size {
        config.output_size = size;
    }
    if cli.dump_source.is_some() {
        config.dump_source = cli.dump_source.clone();
    }

    let doc = GraphDocument::load(&graph_path)?;
    let base_dir = graph_path.parent().unwrap_or(Path::new(".")).to_path_buf();

    if cli.validate_only {
        let cli = Cli {
            output: None,
            ..cli.clone()
        };
        render(&doc, ValidatingBackend::new(), config, &cli, &base_dir)?;
        println!("[validate] {} is valid", graph_path.display());
        return Ok(());
    }
    render(&doc, WgpuBackend::new()?, config, &cli, &base_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cli_graph_output_size() {
        let args: Vec<String> = [
            "--graph",
            "g.json",
            "--output",
            "out.png",
            "--size",
            "64x32",
            "--validate-only",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let cli = parse_cli(&args).unwrap();
        assert_eq!(cli.graph, Some(PathBuf::from("g.json")));
        assert_eq!(cli.output, Some(PathBuf::from("out.png")));
        assert_eq!(cli.size, Some([64, 32]));
        assert!(cli.validate_only);
    }

    #[test]
    fn parse_cli_rejects_bad_input() {
        assert!(parse_cli(&["--graph".to_string()]).is_err());
        assert!(parse_cli(&["--bogus".to_string(), "x".to_string()]).is_err());
        assert!(parse_size("0x4").is_err());
        assert!(parse_size("64").is_err());
    }
}
