use std::fs;
use std::path::PathBuf;

use clap::Parser;
use tinta::{GrammarOptions, Registry, Theme, TokenMetadata};

#[derive(Parser, Debug)]
#[command(name = "tinta-cli")]
#[command(about = "Tokenizes a file with a TextMate grammar")]
#[command(version)]
struct Cli {
    /// JSON grammar files. The first one is used to tokenize, the others can be included by it.
    #[arg(long = "grammar", required = true)]
    grammars: Vec<PathBuf>,
    /// JSON theme file used for the packed metadata
    #[arg(long)]
    theme: Option<PathBuf>,
    /// Prints the packed metadata of each token instead of its scopes
    #[arg(long)]
    binary: bool,
    /// File to tokenize
    file: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let theme = match &cli.theme {
        Some(path) => Theme::load_from_file(path)?,
        None => Theme::default(),
    };
    let registry = Registry::new(theme);
    let mut scopes = Vec::with_capacity(cli.grammars.len());
    for path in &cli.grammars {
        scopes.push(registry.add_grammar_from_path(path)?);
    }
    let grammar = registry.grammar_for_scope_name(&scopes[0], GrammarOptions::new())?;
    let colors = registry.color_map();

    let content = fs::read_to_string(&cli.file)?;
    let mut state = None;
    for (index, line) in content.lines().enumerate() {
        println!("{}: {line}", index + 1);
        if cli.binary {
            let result = grammar.tokenize_line2(line, state.as_ref())?;
            for pair in result.tokens.chunks(2) {
                let metadata = TokenMetadata::from_bits(pair[1]);
                println!(
                    "  {:>4} {:?} fg={} bg={}",
                    pair[0],
                    metadata,
                    colors.color(metadata.foreground()).unwrap_or("-"),
                    colors.color(metadata.background()).unwrap_or("-"),
                );
            }
            state = Some(result.rule_stack);
        } else {
            let result = grammar.tokenize_line(line, state.as_ref())?;
            for token in &result.tokens {
                println!(
                    "  {:>4}..{:<4} {:?} {}",
                    token.start,
                    token.end,
                    &line[token.start..token.end],
                    token.scopes.join(" ")
                );
            }
            state = Some(result.rule_stack);
        }
    }

    Ok(())
}
