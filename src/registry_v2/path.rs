//! V2 path parsing (spec.md §4.7): `<name>` is one or more slash-separated
//! segments, located by scanning for the reserved keywords `manifests`,
//! `tags`, and `blobs` rather than a fixed segment count — this is what
//! lets the engine serve arbitrarily nested repository names like
//! `library/nested/name` the same way it serves `alpine`.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum V2Route {
    Check,
    Catalog,
    TagsList { name: String },
    Manifest { name: String, reference: String },
    Blob { name: String, digest: String },
    StartUpload { name: String },
    UploadSession { name: String, uuid: String },
}

/// Parse the path portion following `/v2/`. Repeated `/` are collapsed and
/// a trailing `/` is ignored, matching spec.md §4.7's normalization rule.
pub fn parse(path: &str) -> Option<V2Route> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Some(V2Route::Check);
    }
    if trimmed == "_catalog" {
        return Some(V2Route::Catalog);
    }

    let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();

    for i in (0..segments.len()).rev() {
        let name_segments = &segments[..i];
        if name_segments.is_empty() {
            continue;
        }

        match segments[i] {
            "manifests" if i + 1 < segments.len() => {
                return Some(V2Route::Manifest {
                    name: name_segments.join("/"),
                    reference: segments[i + 1].to_string(),
                });
            }
            "tags" if i + 1 < segments.len() && segments[i + 1] == "list" => {
                return Some(V2Route::TagsList {
                    name: name_segments.join("/"),
                });
            }
            "blobs" if i + 1 < segments.len() => {
                let name = name_segments.join("/");
                if segments[i + 1] == "uploads" {
                    return Some(if segments.len() > i + 2 {
                        V2Route::UploadSession {
                            name,
                            uuid: segments[i + 2].to_string(),
                        }
                    } else {
                        V2Route::StartUpload { name }
                    });
                }
                return Some(V2Route::Blob {
                    name,
                    digest: segments[i + 1].to_string(),
                });
            }
            _ => continue,
        }
    }

    None
}
