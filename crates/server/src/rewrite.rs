//! Tarball URL rewriting for served documents.

use serde_json::Value;

/// Rewrite every `versions.*.dist.tarball` URL in a document to point
/// at this server.
///
/// The document is parsed once to collect an original→rewritten
/// replacement list, then a single multi-string replace pass rewrites
/// the verbatim text. Everything else in the document — field order,
/// whitespace, unknown fields — survives untouched.
pub fn rewrite_tarball_urls(document: &str, scheme: &str, host: &str) -> String {
    let Ok(doc) = serde_json::from_str::<Value>(document) else {
        return document.to_string();
    };
    let Some(versions) = doc.get("versions").and_then(Value::as_object) else {
        return document.to_string();
    };

    let mut replacements: Vec<(String, String)> = Vec::new();
    for version in versions.values() {
        let Some(tarball) = version
            .get("dist")
            .and_then(|dist| dist.get("tarball"))
            .and_then(Value::as_str)
        else {
            continue;
        };
        let path = url_path_of(tarball);
        let rewritten = format!("{scheme}://{host}{path}");
        if tarball != rewritten && !replacements.iter().any(|(from, _)| from == tarball) {
            replacements.push((tarball.to_string(), rewritten));
        }
    }

    multi_replace(document, &replacements)
}

/// The path component of an absolute URL, with its leading `/`.
fn url_path_of(url: &str) -> &str {
    let rest = match url.find("://") {
        Some(idx) => &url[idx + 3..],
        None => return url,
    };
    match rest.find('/') {
        Some(idx) => &rest[idx..],
        None => "/",
    }
}

/// Replace every occurrence of each `from` with its `to` in one
/// left-to-right pass. Earliest match wins; matched text is never
/// rescanned.
fn multi_replace(input: &str, replacements: &[(String, String)]) -> String {
    if replacements.is_empty() {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while !rest.is_empty() {
        let mut earliest: Option<(usize, usize)> = None;
        for (idx, (from, _)) in replacements.iter().enumerate() {
            if let Some(pos) = rest.find(from.as_str())
                && earliest.is_none_or(|(best, _)| pos < best)
            {
                earliest = Some((pos, idx));
            }
        }
        match earliest {
            Some((pos, idx)) => {
                let (from, to) = &replacements[idx];
                out.push_str(&rest[..pos]);
                out.push_str(to);
                rest = &rest[pos + from.len()..];
            }
            None => {
                out.push_str(rest);
                break;
            }
        }
    }
    out
}
