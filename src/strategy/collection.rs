use url::Url;

use crate::store::Collection;

/// Map an API URL onto the record collection it serves.
///
/// The API names collection endpoints after the collection, so the first
/// path segment decides: `/doctors` and `/doctors/4` both map to `doctors`.
/// Anything else (`/services`, `/`) maps to nothing.
pub fn collection_for_url(url: &Url) -> Option<Collection> {
  url
    .path_segments()?
    .next()
    .and_then(|segment| segment.parse().ok())
}
