// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// User-defined tool: an arbitrary shell command applied to one page.

use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::{Page, PageRef};
use tracing::{debug, info, instrument};

use super::{HandlerCtx, Outcome, expand_placeholders, shell_quote};

/// Run `template` on `page`.
///
/// `%i` is the input file and `%o` the output file. Without `%o` the command
/// is expected to edit `%i` in place, so it is given a copy of the page.
/// `%r` is the horizontal resolution in pixels per inch.
#[instrument(skip_all, fields(page = %page.id))]
pub fn run(ctx: &HandlerCtx<'_>, page: &Page, template: &str) -> Result<Outcome> {
    let suffix = page.suffix();
    let result = ctx.temp_file(&suffix)?;
    let in_place = !template.contains("%o");
    let input = if in_place {
        std::fs::copy(&page.filename, &result).map_err(|err| ScanwerkError::scratch(&result, err))?;
        result.clone()
    } else {
        page.filename.clone()
    };

    let resolution = format!("{}", page.resolution.to_ppi().x.round());
    let input_arg = shell_quote(&input.to_string_lossy());
    let output_arg = shell_quote(&result.to_string_lossy());
    let script = expand_placeholders(
        template,
        &[('i', &input_arg), ('o', &output_arg), ('r', &resolution)],
    );
    debug!(script = %script, "running user-defined command");

    let output = ctx.run_shell(&script)?;
    if !output.stderr.trim().is_empty() {
        ctx.message(output.stderr.trim());
    }

    let (width, height) = image::image_dimensions(&result).map_err(|err| {
        ScanwerkError::ImageError(format!("user-defined tool left no readable image: {err}"))
    })?;
    let new = page.derive(result, width, height);
    info!(width, height, "user-defined command finished");
    ctx.emit_page(new, PageRef::Replace(page.id));
    Ok(Outcome::default())
}
