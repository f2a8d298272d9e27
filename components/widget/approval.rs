/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Embed approval: may this container embed that child?  Decided
//! from the SELF_CONTAINER option and the container's group policy.
//! The group check is postponed until the child's class (and with it
//! its group) is known.

use crate::error::{WidgetError, WidgetErrorCode};
use crate::{Approval, WidgetRef};

/// First approval stage, at `<c:widget>` expansion time.  Returns
/// false if embedding is ultimately denied.
pub fn init_approval(widget: &WidgetRef, self_container: bool) -> bool {
    let parent = widget
        .borrow()
        .parent
        .upgrade()
        .expect("init_approval on a root widget");

    let parent_has_groups = {
        let p = parent.borrow();
        p.cls.as_ref().map(|cls| cls.has_groups()).unwrap_or(false)
    };

    let mut w = widget.borrow_mut();
    debug_assert_eq!(w.approval, Approval::Given);

    if !self_container {
        if parent_has_groups {
            /* the container limits the allowed groups; postpone the
               check until the child's group is known */
            w.approval = Approval::Unknown;
        }

        return true;
    }

    let same_class = {
        let p = parent.borrow();
        p.class_name.is_some() && p.class_name == w.class_name
    };

    if same_class {
        /* approved by SELF_CONTAINER */
        return true;
    }

    if parent_has_groups {
        /* a set of groups is allowed; postpone */
        w.approval = Approval::Unknown;
        true
    } else {
        /* no additional group allowed: ultimately denied */
        w.approval = Approval::Denied;
        false
    }
}

fn check_group_approval(widget: &WidgetRef) -> bool {
    let parent = widget
        .borrow()
        .parent
        .upgrade()
        .expect("group approval on a root widget");

    let parent_cls = parent.borrow().cls.clone();
    let Some(parent_cls) = parent_cls else {
        return true;
    };
    if !parent_cls.has_groups() {
        return true;
    }

    let cls = widget.borrow().cls.clone();
    match cls {
        Some(cls) => parent_cls.may_embed(&cls),
        None => false,
    }
}

/// Final approval check, after the class has been resolved.
pub fn check_approval(widget: &WidgetRef) -> Result<(), WidgetError> {
    let approval = widget.borrow().approval;

    let approval = if approval == Approval::Unknown {
        let decided = if check_group_approval(widget) {
            Approval::Given
        } else {
            Approval::Denied
        };
        widget.borrow_mut().approval = decided;
        decided
    } else {
        approval
    };

    if approval != Approval::Given {
        let class_name = widget
            .borrow()
            .class_name
            .clone()
            .unwrap_or_else(|| "[unknown]".to_string());
        return Err(WidgetError::new(
            WidgetErrorCode::Forbidden,
            format!("not allowed to embed widget class '{}'", class_name),
        ));
    }

    Ok(())
}
