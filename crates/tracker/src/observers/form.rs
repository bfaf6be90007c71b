//! Form interaction observer.

use storefront_core::events::{EventKind, FormAction, FormPayload};

use crate::signals::{non_empty, ElementInfo};

/// Describe a focus/blur/change/submit on a form element; other targets are
/// ignored.
pub fn observe_form(target: &ElementInfo, action: FormAction) -> Option<EventKind> {
    if !target.is_form_element() {
        return None;
    }
    let tag = target.tag_name();
    let form_id = if tag == "form" {
        non_empty(target.id.as_deref()).or(non_empty(target.form_id.as_deref()))
    } else {
        non_empty(target.form_id.as_deref())
    };

    Some(EventKind::FormInteraction(FormPayload {
        form_id: form_id.map(str::to_string),
        field_name: non_empty(target.name.as_deref()).map(str::to_string),
        field_type: Some(
            non_empty(target.input_type.as_deref())
                .map(str::to_string)
                .unwrap_or(tag),
        ),
        action,
    }))
}
