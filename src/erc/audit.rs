use std::{collections::BTreeMap, fs, io::Write, path::PathBuf};

use anyhow::*;
use clap::Parser;
use prettytable::*;
use rayon::prelude::*;

use super::{Rule, check_sequence};
use crate::{
    AppError,
    sequence::{artifact_files, read_artifact},
    vocabulary::Vocabulary,
};

/// Command-line arguments for the check command.
#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Artifact file, or directory searched recursively for `.txt` artifacts
    pub input: PathBuf,

    /// Report file listing every violation (default: summary on stdout only)
    #[clap(long, short)]
    pub report: Option<PathBuf>,

    /// Exit with an error when any artifact fails
    #[clap(long)]
    pub strict: bool,
}

/// Audit a set of artifacts and print per-rule totals.
///
/// Files that cannot be tokenized are counted separately and do not stop
/// the audit.
pub fn check_main(args: CheckArgs) -> Result<()> {
    let CheckArgs {
        input,
        report,
        strict,
    } = args;

    let vocab = Vocabulary::analog()?;
    let files = artifact_files(&input)?;
    if files.is_empty() {
        bail!(AppError::NoArtifacts(input));
    }

    let outcomes: Vec<_> = files
        .par_iter()
        .map(|path| {
            read_artifact(&vocab, path).map(|ids| check_sequence(&vocab, &ids))
        })
        .collect();

    let mut totals: BTreeMap<Rule, usize> = Rule::ALL.iter().map(|&r| (r, 0)).collect();
    let mut clean = 0;
    let mut unreadable = 0;
    let mut details = Vec::new();

    for (path, outcome) in files.iter().zip(outcomes) {
        match outcome {
            Result::Ok(erc) => {
                if erc.is_clean() {
                    clean += 1;
                }
                for (rule, count) in erc.count_by_rule() {
                    *totals.entry(rule).or_default() += count;
                }
                for violation in erc.violations {
                    details.push(format!(
                        "{}: [{}] {}",
                        path.display(),
                        violation.rule(),
                        violation
                    ));
                }
            }
            Err(err) => {
                unreadable += 1;
                details.push(format!("{}: [unreadable] {:#}", path.display(), err));
            }
        }
    }

    let mut table = Table::new();
    table.set_titles(row!["Rule", "Violations"]);
    table.set_format(*format::consts::FORMAT_NO_LINESEP_WITH_TITLE);
    for (rule, count) in totals.iter() {
        table.add_row(row![rule, count]);
    }
    table.add_row(row!["", ""]);
    table.add_row(row!["artifacts", files.len()]);
    table.add_row(row!["clean", clean]);
    table.add_row(row!["unreadable", unreadable]);

    let mut stdout = std::io::stdout();
    table.print(&mut stdout)?;

    if let Some(path) = report {
        let mut writer = std::io::BufWriter::new(fs::File::create(path)?);
        for line in details.iter() {
            writeln!(writer, "{}", line)?;
        }
    }

    let failing = files.len() - clean;
    if strict && failing > 0 {
        bail!("{} of {} artifacts failed the rule check", failing, files.len());
    }

    Ok(())
}
