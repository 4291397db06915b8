//! Helpers for the forward-slash relative paths stored in the database.
//!
//! Entry paths are never anchored: a domain root has the empty path and its
//! children look like `Library/Preferences/com.apple.foo.plist`.

pub const SEPARATOR: char = '/';

/// Characters that cannot appear in file names on every platform.
const INVALID_CHARACTERS: [char; 7] = [':', '*', '?', '"', '<', '>', '|'];

/// Everything before the last separator, or `""` at the top level.
pub fn parent_path(path: &str) -> &str {
    match path.rfind(SEPARATOR) {
        Some(i) => &path[..i],
        None => "",
    }
}

pub fn file_name(path: &str) -> &str {
    match path.rfind(SEPARATOR) {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

/// Extension of the last path component without the dot, or `""`.
pub fn file_extension(path: &str) -> &str {
    let name = file_name(path);
    match name.rfind('.') {
        Some(i) => &name[i + 1..],
        None => "",
    }
}

/// Depth of `path`: 0 for a domain root, 1 for its direct children.
pub fn path_level(path: &str) -> usize {
    if path.is_empty() {
        0
    } else {
        path.matches(SEPARATOR).count() + 1
    }
}

/// Replace characters that are not allowed in file names with `-`.
pub fn clean_path(path: &str) -> String {
    path.chars()
        .map(|c| if INVALID_CHARACTERS.contains(&c) { '-' } else { c })
        .collect()
}

/// `name` after [`clean_path`], if it is a single ordinary file name.
///
/// Names that would leave the folder they are joined to (`..`, `.`, rooted or
/// drive-prefixed names, anything carrying a separator) give `None`.
pub fn safe_component(name: &str) -> Option<String> {
    if name.contains(SEPARATOR) || name.contains('\\') {
        return None;
    }
    let cleaned = clean_path(name);
    let mut components = std::path::Path::new(&cleaned).components();
    match (components.next(), components.next()) {
        (Some(std::path::Component::Normal(_)), None) => Some(cleaned),
        _ => None,
    }
}

/// Escape the SQL `LIKE` wildcards of `value` using `\` as escape character.
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// The family a domain belongs to, decided by its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DomainGroup {
    Applications,
    ApplicationGroups,
    ApplicationPlugins,
    SystemContainers,
    SystemSharedContainers,
    Other,
}

impl DomainGroup {
    const PREFIXES: [(&'static str, DomainGroup); 5] = [
        ("AppDomainGroup-", DomainGroup::ApplicationGroups),
        ("AppDomainPlugin-", DomainGroup::ApplicationPlugins),
        ("AppDomain-", DomainGroup::Applications),
        ("SysSharedContainerDomain-", DomainGroup::SystemSharedContainers),
        ("SysContainerDomain-", DomainGroup::SystemContainers),
    ];

    pub fn of(domain: &str) -> DomainGroup {
        Self::PREFIXES
            .iter()
            .find(|(prefix, _)| domain.starts_with(*prefix))
            .map(|(_, group)| *group)
            .unwrap_or(DomainGroup::Other)
    }

    /// The part of `domain` after its group prefix, usually a bundle identifier.
    pub fn identifier(domain: &str) -> &str {
        Self::PREFIXES
            .iter()
            .find_map(|(prefix, _)| domain.strip_prefix(*prefix))
            .unwrap_or(domain)
    }

    pub fn label(&self) -> &'static str {
        match self {
            DomainGroup::Applications => "Applications",
            DomainGroup::ApplicationGroups => "Application Groups",
            DomainGroup::ApplicationPlugins => "Application Plugins",
            DomainGroup::SystemContainers => "System Containers",
            DomainGroup::SystemSharedContainers => "System Shared Containers",
            DomainGroup::Other => "Other",
        }
    }
}
