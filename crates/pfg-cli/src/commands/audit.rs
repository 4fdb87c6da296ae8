//! `pfg audit-verify`.

use anyhow::Result;
use pfg_guardian::{verify_chain, ChainCheck};

pub fn audit_verify(path: &str) -> Result<()> {
    match verify_chain(path)? {
        ChainCheck::Valid { lines } => {
            println!("audit_chain=valid lines={lines} path={path}");
            Ok(())
        }
        ChainCheck::Broken { line, reason } => {
            anyhow::bail!("AUDIT_CHAIN_BROKEN path={path} line={line}: {reason}")
        }
    }
}
