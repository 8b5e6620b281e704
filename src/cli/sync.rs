use colored::Colorize;

use crate::decrypt::PdfDecryptor;
use crate::error::Result;
use crate::extract::PdfTableExtractor;
use crate::pipeline::Pipeline;
use crate::settings::{load_settings, statement_password, SyncConfig, SyncOverrides};
use crate::source::DirectorySource;

use super::open_configured_ledger;

pub fn run(overrides: SyncOverrides) -> Result<()> {
    let settings = load_settings();
    let conn = open_configured_ledger(&settings)?;
    let config = SyncConfig::resolve(&settings, overrides, statement_password()?)?;

    let mut source = DirectorySource::new(&config.statements_dir, config.filter);
    let pipeline = Pipeline::new(
        &conn,
        PdfDecryptor::new(config.password),
        PdfTableExtractor,
        config.aliases,
    );
    let summary = pipeline.run(&mut source)?;

    println!("{summary}");
    if summary.inserted > 0 {
        println!("{}", format!("{} new transactions", summary.inserted).green());
    } else {
        println!("{}", "Ledger already up to date".dimmed());
    }
    let failed = summary.documents_decrypt_failed + summary.documents_unreadable;
    if failed > 0 {
        println!(
            "{}",
            format!("{failed} statements could not be read; run with -v for details").yellow()
        );
    }
    Ok(())
}
