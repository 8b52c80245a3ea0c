use url::Url;

use crate::ValidatorResult;

pub(crate) fn is_absolute_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

pub(crate) fn merge_baseurls(current: &Url, new: &str) -> ValidatorResult<Url> {
    if is_absolute_url(new) {
        Ok(Url::parse(new)?)
    } else {
        // The query portion of the current URL (the manifest URL or a BaseURL
        // element merged into it) usually carries edge-auth tokens, so a
        // relative segment URI inherits it. A query on the new URI wins.
        //
        // merge_baseurls(https://example.com/manifest.mpd?auth=secret, /video42.mp4) =>
        //   https://example.com/video42.mp4?auth=secret
        //
        // merge_baseurls(https://example.com/manifest.mpd?auth=old, /video42.mp4?auth=new) =>
        //   https://example.com/video42.mp4?auth=new
        let mut merged = current.join(new)?;
        if merged.query().is_none() {
            merged.set_query(current.query());
        }
        Ok(merged)
    }
}

/// Directory of the manifest URL. Relative segment URIs resolve against it.
pub(crate) fn manifest_base_url(url: &Url) -> ValidatorResult<Url> {
    let mut base = url.join(".")?;
    base.set_query(url.query());
    Ok(base)
}
