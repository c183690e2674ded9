//! Custom help formatting for consistent CLI display.

use crate::display::theme::Theme;
use console::style;

/// Format help text with consistent styling
pub fn format_help_section(title: &str, content: &str, indent: bool) -> String {
    let mut output = String::new();

    if Theme::should_disable_colors() {
        output.push_str(&format!("{title}\n"));
    } else {
        output.push_str(&format!("{}\n", style(title).cyan().bold()));
    }

    for line in content.lines() {
        if line.trim().is_empty() {
            output.push('\n');
        } else if indent && !line.starts_with("    ") {
            output.push_str(&format!("    {line}\n"));
        } else {
            output.push_str(&format!("{line}\n"));
        }
    }

    output
}

/// Text shown after the command list in `transmem --help`.
pub fn create_help_text() -> String {
    let mut help = String::new();

    let quick_start = r#"$ transmem init                          # Write .transmem/settings.toml
$ transmem build old/*.tsv               # Build the dictionary
$ transmem transfer new.tsv -o out.tsv   # Fill in translations"#;

    help.push_str(&format_help_section("QUICK START", quick_start, true));
    help.push('\n');

    let examples = r#"# Look up a single string
$ transmem query "아이템을 획득했습니다" --json

# Match line by line and keep untranslated cells as-is
$ transmem transfer new.tsv -o out.tsv --mode split --keep-original

# Earlier reference files win on conflicting translations
$ transmem build v1.tsv v2.tsv --conflict first

# List rows whose translation has a different number of lines
$ transmem check-newlines strings.tsv --report mismatches.tsv"#;

    help.push_str(&format_help_section("EXAMPLES", examples, true));
    help.push('\n');

    let environment = r#"TRANSMEM_MATCHING__THRESHOLD=0.95    Override any setting
TRANSMEM_ENCODER__MODEL=hash         Offline deterministic encoder
NO_COLOR=1                           Plain output"#;

    help.push_str(&format_help_section("ENVIRONMENT", environment, true));
    help.push('\n');

    help.push_str(&format_help_section(
        "LEARN MORE",
        "Commands: transmem help <COMMAND>",
        true,
    ));

    help
}
