//! Logical-path layout of resources within their object.
//!
//! Every resource owns a header sidecar under `.ark/`; RDF content lives
//! beside it as N-Triples, binaries keep their own name. The object-root
//! resource gets fixed names (`root.json`, `container.nt`) since its
//! relative path is empty.

use ark_types::ResourceId;

use crate::error::{OcflError, OcflResult};

const SIDECAR_DIR: &str = ".ark";
const ROOT_HEADER_FILE: &str = "root";
const ROOT_CONTAINER_FILE: &str = "container.nt";

/// Logical path of the header sidecar for `resource` inside the object
/// rooted at `root`.
pub fn header_path(root: &ResourceId, resource: &ResourceId) -> OcflResult<String> {
    let rel = rel_path(root, resource)?;
    Ok(if rel.is_empty() {
        format!("{SIDECAR_DIR}/{ROOT_HEADER_FILE}.json")
    } else {
        format!("{SIDECAR_DIR}/{rel}.json")
    })
}

/// Logical path of an RDF resource's content file.
pub fn rdf_content_path(root: &ResourceId, resource: &ResourceId) -> OcflResult<String> {
    let rel = rel_path(root, resource)?;
    Ok(if rel.is_empty() {
        ROOT_CONTAINER_FILE.to_string()
    } else {
        format!("{rel}.nt")
    })
}

/// Logical path of a binary resource's content file. The object-root
/// binary is named by its final id segment.
pub fn binary_content_path(root: &ResourceId, resource: &ResourceId) -> OcflResult<String> {
    let rel = rel_path(root, resource)?;
    if !rel.is_empty() {
        return Ok(rel.to_string());
    }
    resource
        .segments()
        .last()
        .map(str::to_string)
        .ok_or_else(|| OcflError::NotInObject {
            root: root.clone(),
            resource: resource.clone(),
        })
}

fn rel_path<'a>(root: &ResourceId, resource: &'a ResourceId) -> OcflResult<&'a str> {
    resource
        .relative_to(root)
        .ok_or_else(|| OcflError::NotInObject {
            root: root.clone(),
            resource: resource.clone(),
        })
}
