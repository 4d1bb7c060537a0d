use std::collections::HashSet;
use uuid::Uuid;

use crate::models::Note;

/// Returns `incoming` ready to append to `existing`: fresh ids, and a title already in use
/// becomes `<title> (copie)`, then `<title> (copie 2)` and so on. `existing` is only read.
pub fn prepare_import(existing: &[Note], incoming: Vec<Note>) -> Vec<Note> {
    let mut titles: HashSet<String> = existing.iter().map(|n| n.title.clone()).collect();
    let mut ids: HashSet<Uuid> = existing.iter().map(|n| n.id).collect();

    incoming
        .into_iter()
        .map(|mut note| {
            note.id = fresh_id(&ids);
            ids.insert(note.id);

            let title = unique_title(&note.title, &titles);
            titles.insert(title.clone());
            note.title = title;
            note
        })
        .collect()
}

fn fresh_id(taken: &HashSet<Uuid>) -> Uuid {
    loop {
        let id = Uuid::new_v4();
        if !taken.contains(&id) {
            return id;
        }
    }
}

fn unique_title(title: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(title) {
        return title.to_string();
    }
    let first = format!("{} (copie)", title);
    if !taken.contains(&first) {
        return first;
    }
    (2..)
        .map(|n| format!("{} (copie {})", title, n))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titled(titles: &[&str]) -> Vec<Note> {
        titles.iter().map(|t| Note::new(*t, "")).collect()
    }

    fn titles_of(notes: &[Note]) -> Vec<&str> {
        notes.iter().map(|n| n.title.as_str()).collect()
    }

    #[test]
    fn colliding_titles_are_numbered_deterministically() {
        let existing = titled(&["A"]);
        let prepared = prepare_import(&existing, titled(&["A", "A"]));
        assert_eq!(titles_of(&prepared), vec!["A (copie)", "A (copie 2)"]);
    }

    #[test]
    fn probing_skips_taken_copies() {
        let existing = titled(&["A", "A (copie)", "A (copie 2)"]);
        let prepared = prepare_import(&existing, titled(&["A", "B"]));
        assert_eq!(titles_of(&prepared), vec!["A (copie 3)", "B"]);
    }

    #[test]
    fn incoming_notes_never_collide_with_each_other() {
        let prepared = prepare_import(&[], titled(&["X", "X", "X (copie)"]));
        assert_eq!(titles_of(&prepared), vec!["X", "X (copie)", "X (copie) (copie)"]);
    }

    #[test]
    fn ids_are_always_regenerated() {
        let existing = titled(&["A"]);
        let mut incoming = titled(&["B"]);
        incoming[0].id = existing[0].id;
        let original_id = incoming[0].id;

        let prepared = prepare_import(&existing, incoming);
        assert_ne!(prepared[0].id, original_id);
        assert_eq!(existing[0].title, "A");
    }
}
