//! XML request bodies for changeset writes.

use quick_xml::escape::escape;
use waymark_core::{Changeset, ChangesetId, Entity, OsmChange, Tags};

const GENERATOR: &str = "waymark";

/// Body of a changeset-create request.
///
/// Tags are written in key order so identical changesets encode identically.
///
/// # Examples
/// ```
/// use waymark_core::{Changeset, Tags};
/// use waymark_data::encode_changeset;
///
/// let body = encode_changeset(&Changeset::new(Tags::from([(
///     "comment".into(),
///     "Fix <name>".into(),
/// )])));
/// assert!(body.contains(r#"<tag k="comment" v="Fix &lt;name&gt;"/>"#));
/// ```
#[must_use]
pub fn encode_changeset(changeset: &Changeset) -> String {
    let mut body = String::from("<osm>");
    body.push_str(&format!(
        r#"<changeset version="0.6" generator="{GENERATOR}">"#
    ));
    push_tags(&mut body, &changeset.tags);
    body.push_str("</changeset></osm>");
    body
}

/// Body of a diff upload against changeset `changeset_id`.
///
/// Every element carries the changeset id. Deletions are marked
/// `if-unused` so the server skips entities still referenced elsewhere
/// instead of failing the whole upload.
#[must_use]
pub fn encode_osm_change(change: &OsmChange, changeset_id: ChangesetId) -> String {
    let mut body = format!(r#"<osmChange version="0.6" generator="{GENERATOR}">"#);
    push_section(&mut body, "<create>", "</create>", &change.created, changeset_id);
    push_section(&mut body, "<modify>", "</modify>", &change.modified, changeset_id);
    push_section(
        &mut body,
        r#"<delete if-unused="true">"#,
        "</delete>",
        &change.deleted,
        changeset_id,
    );
    body.push_str("</osmChange>");
    body
}

fn push_section(
    body: &mut String,
    open: &str,
    close: &str,
    entities: &[Entity],
    changeset_id: ChangesetId,
) {
    if entities.is_empty() {
        return;
    }
    body.push_str(open);
    for entity in entities {
        push_entity(body, entity, changeset_id);
    }
    body.push_str(close);
}

fn push_entity(body: &mut String, entity: &Entity, changeset_id: ChangesetId) {
    let meta = entity.meta();
    let name = entity.kind().as_str();
    body.push_str(&format!(
        r#"<{name} id="{}" version="{}" changeset="{changeset_id}""#,
        meta.id.osm_id(),
        meta.version.unwrap_or(0),
    ));
    if let Entity::Node(node) = entity {
        body.push_str(&format!(
            r#" lat="{}" lon="{}""#,
            node.location.y, node.location.x
        ));
    }
    body.push('>');

    match entity {
        Entity::Node(_) => {}
        Entity::Way(way) => {
            for node in &way.nodes {
                body.push_str(&format!(r#"<nd ref="{}"/>"#, node.osm_id()));
            }
        }
        Entity::Relation(relation) => {
            for member in &relation.members {
                body.push_str(&format!(
                    r#"<member type="{}" ref="{}" role="{}"/>"#,
                    member.kind,
                    member.id.osm_id(),
                    escape(member.role.as_str()),
                ));
            }
        }
    }
    push_tags(body, &meta.tags);
    body.push_str(&format!("</{name}>"));
}

fn push_tags(body: &mut String, tags: &Tags) {
    let mut sorted: Vec<_> = tags.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in sorted {
        body.push_str(&format!(
            r#"<tag k="{}" v="{}"/>"#,
            escape(key.as_str()),
            escape(value.as_str())
        ));
    }
}
