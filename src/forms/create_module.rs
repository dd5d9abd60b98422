//! The module-creation form: business selection, cluster input by
//! topology or free text, and a module attribute table built from a
//! remotely fetched schema, either per service category or per service
//! template.

use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::context::RunContext;
use crate::error::BuildError;
use crate::events::{adopt_context_biz, cascade_reload, replay_change, show_when, EventKind};
use crate::fields::{
    ColumnDef, ExpandSpec, FieldData, FieldKind, FieldState, FieldValue, OptionItem, RemoteSpec,
};
use crate::form::{Form, FormBuilder};
use crate::services::data::{
    attribute_schema_template, business_list_template, service_category_expand,
    service_category_template, service_templates_template, topology_template,
};
use crate::services::loader::{decode_category_nodes, decode_columns, decode_options, decode_tree};
use crate::validate::{required_when, Rule};

pub const BIZ: &str = "biz_cc_id";
pub const SET_SELECT_METHOD: &str = "cc_set_select_method";
pub const SET_SELECT_TOPO: &str = "cc_set_select_topo";
pub const SET_SELECT_TEXT: &str = "cc_set_select_text";
pub const CREATE_METHOD: &str = "cc_create_method";
pub const MODULE_INFOS_CATEGORY: &str = "cc_module_infos_category";
pub const MODULE_INFOS_TEMPLATE: &str = "cc_module_infos_template";
pub const SERVICE_CATEGORY: &str = "cc_service_category";
pub const SERVICE_TEMPLATE: &str = "cc_service_template";

const DEFAULT_TEMPLATE: &str = "Default_-1";

pub fn create_module_form(ctx: RunContext) -> Result<Form, BuildError> {
    let biz_locked = !ctx.can_select_biz;
    let mut builder = FormBuilder::new(ctx);

    let mut biz = FieldState::new(BIZ, "Business", FieldKind::Select);
    biz.hookable = true;
    biz.disabled = biz_locked;
    biz.rules.push(Rule::Required);
    biz.remote = Some(RemoteSpec::new(
        business_list_template(),
        Arc::new(decode_options),
    ));
    builder = builder.field(biz);

    let mut method = FieldState::new(
        SET_SELECT_METHOD,
        "Cluster input method",
        FieldKind::Radio {
            items: vec![
                OptionItem::new("topo", "Pick from topology"),
                OptionItem::new("text", "Type full paths"),
            ],
        },
    );
    method.value = FieldValue::text("topo");
    method.rules.push(Rule::Required);
    builder = builder.field(method);

    let mut topo = FieldState::new(SET_SELECT_TOPO, "Clusters", FieldKind::Tree);
    topo.hookable = true;
    topo.rules.push(required_when(
        SET_SELECT_METHOD,
        "topo",
        "please pick at least one cluster",
    ));
    topo.remote = Some(RemoteSpec::new(
        topology_template(Some(BIZ)),
        Arc::new(decode_tree),
    ));
    builder = builder.field(topo);

    let mut text = FieldState::new(SET_SELECT_TEXT, "Clusters", FieldKind::TextArea);
    text.hookable = true;
    text.attrs.insert(
        "placeholder".into(),
        JsonValue::String(
            "Full paths from the business topology, e.g. `BizA>NetB>ClusterC`, \
             one target cluster per line"
                .into(),
        ),
    );
    text.rules.push(required_when(
        SET_SELECT_METHOD,
        "text",
        "cluster path must not be empty",
    ));
    builder = builder.field(text);

    let mut create = FieldState::new(
        CREATE_METHOD,
        "Creation method",
        FieldKind::Radio {
            items: vec![
                OptionItem::new("template", "From service template"),
                OptionItem::new("category", "Create directly"),
            ],
        },
    );
    create.value = FieldValue::text("category");
    create.rules.push(Rule::Required);
    builder = builder.field(create);

    let mut cat_table = FieldState::new(MODULE_INFOS_CATEGORY, "Module details", FieldKind::Table);
    cat_table.hookable = true;
    cat_table.attrs.insert("add_btn".into(), JsonValue::Bool(true));
    cat_table.remote = Some(RemoteSpec::new(
        attribute_schema_template(Some(BIZ)),
        Arc::new(category_columns),
    ));
    builder = builder.field(cat_table);

    let mut tmpl_table = FieldState::new(MODULE_INFOS_TEMPLATE, "Module details", FieldKind::Table);
    tmpl_table.hookable = true;
    tmpl_table
        .attrs
        .insert("add_btn".into(), JsonValue::Bool(true));
    tmpl_table.remote = Some(RemoteSpec::new(
        attribute_schema_template(Some(BIZ)),
        Arc::new(template_columns),
    ));
    builder = builder.field(tmpl_table);

    let mut svc_cat = FieldState::new(SERVICE_CATEGORY, "Service category", FieldKind::Tree);
    let mut remote = RemoteSpec::new(
        service_category_template(Some(BIZ)),
        decode_category_nodes(false),
    );
    remote.expand = Some(ExpandSpec {
        template: service_category_expand(Some(BIZ)),
        init: decode_category_nodes(true),
    });
    svc_cat.remote = Some(remote);
    builder = builder.field(svc_cat);

    let mut svc_tmpl = FieldState::new(SERVICE_TEMPLATE, "Service template", FieldKind::Select);
    svc_tmpl.value = FieldValue::text(DEFAULT_TEMPLATE);
    let mut remote = RemoteSpec::new(
        service_templates_template(Some(BIZ)),
        Arc::new(decode_options),
    );
    remote.adopt_first = true;
    svc_tmpl.remote = Some(remote);
    builder = builder.field(svc_tmpl);

    use EventKind::{Change, Init};
    builder = builder
        .on(BIZ, Init, BIZ, adopt_context_biz())
        // Cluster pickers follow the business.
        .on(BIZ, Init, SET_SELECT_TOPO, cascade_reload(false))
        .on(BIZ, Change, SET_SELECT_TOPO, cascade_reload(true))
        // Selector defaults replay through the change path on init.
        .on(SET_SELECT_METHOD, Init, SET_SELECT_METHOD, replay_change())
        .on(SET_SELECT_METHOD, Change, SET_SELECT_TOPO, show_when("topo"))
        .on(SET_SELECT_METHOD, Change, SET_SELECT_TEXT, show_when("text"))
        .on(CREATE_METHOD, Init, CREATE_METHOD, replay_change())
        .on(
            CREATE_METHOD,
            Change,
            MODULE_INFOS_CATEGORY,
            show_when("category"),
        )
        .on(CREATE_METHOD, Change, SERVICE_CATEGORY, show_when("category"))
        .on(
            CREATE_METHOD,
            Change,
            MODULE_INFOS_TEMPLATE,
            show_when("template"),
        )
        .on(CREATE_METHOD, Change, SERVICE_TEMPLATE, show_when("template"))
        // Module tables and their companion columns follow the business.
        .on(BIZ, Init, MODULE_INFOS_CATEGORY, cascade_reload(false))
        .on(BIZ, Change, MODULE_INFOS_CATEGORY, cascade_reload(true))
        .on(BIZ, Init, MODULE_INFOS_TEMPLATE, cascade_reload(false))
        .on(BIZ, Change, MODULE_INFOS_TEMPLATE, cascade_reload(true))
        .on(BIZ, Init, SERVICE_CATEGORY, cascade_reload(false))
        .on(BIZ, Change, SERVICE_CATEGORY, cascade_reload(false))
        .on(BIZ, Init, SERVICE_TEMPLATE, cascade_reload(false))
        .on(BIZ, Change, SERVICE_TEMPLATE, cascade_reload(false));

    builder.build()
}

fn service_category_column() -> ColumnDef {
    let mut attrs = serde_json::Map::new();
    attrs.insert("width".into(), JsonValue::String("200px".into()));
    attrs.insert("lazy".into(), JsonValue::Bool(true));
    ColumnDef {
        tag: SERVICE_CATEGORY.into(),
        label: "Service category".into(),
        kind: "cascader".into(),
        attrs,
    }
}

fn service_template_column() -> ColumnDef {
    let mut attrs = serde_json::Map::new();
    attrs.insert("width".into(), JsonValue::String("200px".into()));
    attrs.insert(
        "default".into(),
        JsonValue::String(DEFAULT_TEMPLATE.into()),
    );
    ColumnDef {
        tag: SERVICE_TEMPLATE.into(),
        label: "Service template".into(),
        kind: "select".into(),
        attrs,
    }
}

/// Direct creation: attribute columns plus the service category
/// cascader at the end.
fn category_columns(data: &JsonValue) -> Result<FieldData, String> {
    let FieldData::Columns(mut cols) = decode_columns(data)? else {
        return Err("expected columns".into());
    };
    cols.push(service_category_column());
    Ok(FieldData::Columns(cols))
}

/// Template creation: the module name comes from the template, so that
/// column goes away and the template picker leads.
fn template_columns(data: &JsonValue) -> Result<FieldData, String> {
    let FieldData::Columns(mut cols) = decode_columns(data)? else {
        return Err("expected columns".into());
    };
    cols.retain(|c| c.tag != "bk_module_name");
    cols.insert(0, service_template_column());
    Ok(FieldData::Columns(cols))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::data::{DataService, StaticDataService};
    use crate::services::loader::run_to_idle;
    use serde_json::json;

    fn console() -> Arc<dyn DataService> {
        Arc::new(
            StaticDataService::default()
                .route(
                    "/pipeline/cc_get_business_list/",
                    json!({"result": true, "data": [
                        {"value": "2", "label": "Blue"},
                        {"value": "3", "label": "Green"}
                    ]}),
                )
                .route(
                    "/pipeline/cc_search_topo/set/normal/2/",
                    json!({"result": true, "data": [
                        {"value": "set-1", "label": "Set 1", "children": [
                            {"value": "mod-1", "label": "Mod 1"}
                        ]}
                    ]}),
                )
                .route(
                    "/pipeline/cc_search_topo/set/normal/3/",
                    json!({"result": true, "data": [
                        {"value": "set-9", "label": "Set 9"}
                    ]}),
                )
                .route(
                    "/pipeline/cc_search_create_object_attribute/module/2/",
                    json!({"result": true, "data": [
                        {"tag_code": "bk_module_name", "attrs": {"name": "Module Name"}},
                        {"tag_code": "operator", "attrs": {"name": "Operator"}}
                    ]}),
                )
                .route(
                    "/pipeline/cc_search_create_object_attribute/module/3/",
                    json!({"result": true, "data": [
                        {"tag_code": "bk_module_name", "attrs": {"name": "Module Name"}}
                    ]}),
                )
                .route(
                    "/pipeline/cc_search_create_object_attribute/set/2/",
                    json!({"result": true, "data": [
                        {"tag_code": "bk_set_name", "attrs": {"name": "Set Name"}}
                    ]}),
                )
                .route(
                    "/pipeline/cc_list_service_category/2/0/",
                    json!({"result": true, "data": [
                        {"value": "10", "label": "DB"}
                    ]}),
                )
                .route(
                    "/pipeline/cc_list_service_category/2/10/",
                    json!({"result": true, "data": [
                        {"value": "101", "label": "MySQL"}
                    ]}),
                )
                .route(
                    "/pipeline/cc_list_service_category/3/0/",
                    json!({"result": true, "data": []}),
                )
                .route(
                    "/pipeline/cc_list_service_template/2/",
                    json!({"result": true, "data": [
                        {"value": "t1", "label": "Tmpl 1"},
                        {"value": "t2", "label": "Tmpl 2"}
                    ]}),
                )
                .route(
                    "/pipeline/cc_list_service_template/3/",
                    json!({"result": true, "data": []}),
                ),
        )
    }

    fn built_form() -> Form {
        let svc = console();
        let mut form = create_module_form(RunContext::new("/", "2", true)).unwrap();
        let effects = form.init().unwrap();
        run_to_idle(&mut form, &svc, effects).unwrap();
        form
    }

    fn visible(form: &Form, name: &str) -> bool {
        form.field(name).unwrap().visible
    }

    #[test]
    fn init_adopts_context_business_and_loads_everything() {
        let form = built_form();
        assert_eq!(form.field(BIZ).unwrap().value.as_text(), Some("2"));
        let FieldData::Options(biz_opts) = &form.field(BIZ).unwrap().data else {
            panic!("business list not loaded");
        };
        assert_eq!(biz_opts.len(), 2);
        let FieldData::Tree(topo) = &form.field(SET_SELECT_TOPO).unwrap().data else {
            panic!("topology not loaded");
        };
        assert!(topo.get("set-1").is_some());
        assert!(topo.get("mod-1").unwrap().leaf);
    }

    #[test]
    fn selector_defaults_show_exactly_one_of_each_group() {
        let form = built_form();
        assert!(visible(&form, SET_SELECT_TOPO));
        assert!(!visible(&form, SET_SELECT_TEXT));
        assert!(visible(&form, MODULE_INFOS_CATEGORY));
        assert!(!visible(&form, MODULE_INFOS_TEMPLATE));
        assert!(visible(&form, SERVICE_CATEGORY));
        assert!(!visible(&form, SERVICE_TEMPLATE));
    }

    #[test]
    fn switching_selectors_flips_visibility_both_ways() {
        let mut form = built_form();
        form.set_value(CREATE_METHOD, FieldValue::text("template"))
            .unwrap();
        assert!(!visible(&form, MODULE_INFOS_CATEGORY));
        assert!(visible(&form, MODULE_INFOS_TEMPLATE));
        assert!(visible(&form, SERVICE_TEMPLATE));
        form.set_value(CREATE_METHOD, FieldValue::text("category"))
            .unwrap();
        assert!(visible(&form, MODULE_INFOS_CATEGORY));
        assert!(!visible(&form, MODULE_INFOS_TEMPLATE));

        form.set_value(SET_SELECT_METHOD, FieldValue::text("text"))
            .unwrap();
        assert!(!visible(&form, SET_SELECT_TOPO));
        assert!(visible(&form, SET_SELECT_TEXT));
    }

    #[test]
    fn category_table_appends_cascader_and_template_table_swaps_name_column() {
        let form = built_form();
        let FieldData::Columns(cat) = &form.field(MODULE_INFOS_CATEGORY).unwrap().data else {
            panic!("category columns not loaded");
        };
        assert_eq!(cat.last().unwrap().tag, SERVICE_CATEGORY);
        assert_eq!(cat.last().unwrap().kind, "cascader");
        assert!(cat.iter().any(|c| c.tag == "bk_module_name"));

        let FieldData::Columns(tmpl) = &form.field(MODULE_INFOS_TEMPLATE).unwrap().data else {
            panic!("template columns not loaded");
        };
        assert_eq!(tmpl.first().unwrap().tag, SERVICE_TEMPLATE);
        assert_eq!(tmpl.first().unwrap().kind, "select");
        assert!(tmpl.iter().all(|c| c.tag != "bk_module_name"));
    }

    #[test]
    fn service_template_select_adopts_first_loaded_option() {
        let form = built_form();
        assert_eq!(
            form.field(SERVICE_TEMPLATE).unwrap().value.as_text(),
            Some("t1")
        );
        let FieldData::Options(opts) = &form.field(SERVICE_TEMPLATE).unwrap().data else {
            panic!("templates not loaded");
        };
        assert_eq!(opts.len(), 2);
    }

    #[test]
    fn clearing_the_business_clears_dependent_values_and_data() {
        let svc = console();
        let mut form = built_form();
        // Give the topo field a selection first.
        form.set_value(SET_SELECT_TOPO, FieldValue::Items(vec!["set-1".into()]))
            .unwrap();
        let effects = form.set_value(BIZ, FieldValue::text("")).unwrap();
        run_to_idle(&mut form, &svc, effects).unwrap();
        let topo = form.field(SET_SELECT_TOPO).unwrap();
        assert!(topo.value.is_empty());
        assert_eq!(topo.data, FieldData::Empty);
        assert_eq!(form.field(MODULE_INFOS_CATEGORY).unwrap().data, FieldData::Empty);
    }

    #[test]
    fn switching_business_reloads_dependents_with_new_data() {
        let svc = console();
        let mut form = built_form();
        let effects = form.set_value(BIZ, FieldValue::text("3")).unwrap();
        run_to_idle(&mut form, &svc, effects).unwrap();
        let FieldData::Tree(topo) = &form.field(SET_SELECT_TOPO).unwrap().data else {
            panic!("topology not reloaded");
        };
        assert!(topo.get("set-9").is_some());
        assert!(topo.get("set-1").is_none());
        // Empty template list for the new business: no option to adopt.
        let FieldData::Options(opts) = &form.field(SERVICE_TEMPLATE).unwrap().data else {
            panic!("templates not reloaded");
        };
        assert!(opts.is_empty());
    }

    #[test]
    fn locked_business_context_loads_without_selection() {
        let svc = console();
        let mut form = create_module_form(RunContext::new("/", "2", false)).unwrap();
        assert!(form.field(BIZ).unwrap().disabled);
        let effects = form.init().unwrap();
        run_to_idle(&mut form, &svc, effects).unwrap();
        assert_eq!(form.field(BIZ).unwrap().value.as_text(), Some("2"));
        assert_ne!(form.field(SET_SELECT_TOPO).unwrap().data, FieldData::Empty);
        // The init cascade re-scopes the schema to the adopted business;
        // the early set-scope load must not win.
        let FieldData::Columns(cols) = &form.field(MODULE_INFOS_CATEGORY).unwrap().data else {
            panic!("schema not loaded");
        };
        assert!(cols.iter().any(|c| c.tag == "bk_module_name"));
        assert!(cols.iter().all(|c| c.tag != "bk_set_name"));
    }

    #[test]
    fn submit_enforces_cluster_choice_for_the_active_method_only() {
        let mut form = built_form();
        // Default method is topo with no selection yet.
        let outcome = form.submit();
        assert!(!outcome.ok);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].0, SET_SELECT_TOPO);
        assert!(outcome.failures[0].1.contains("cluster"));

        form.set_value(SET_SELECT_TOPO, FieldValue::Items(vec!["set-1".into()]))
            .unwrap();
        let outcome = form.submit();
        assert!(outcome.ok);
        let payload = outcome.payload.unwrap();
        assert_eq!(
            payload["values"][SET_SELECT_TOPO],
            serde_json::json!(["set-1"])
        );
        // Hidden fields stay out of the payload.
        assert!(payload["values"].get(SET_SELECT_TEXT).is_none());

        // Switch to free text: the tree rule goes dormant, the text one wakes.
        form.set_value(SET_SELECT_METHOD, FieldValue::text("text"))
            .unwrap();
        let outcome = form.submit();
        assert!(!outcome.ok);
        assert_eq!(outcome.failures[0].0, SET_SELECT_TEXT);
        form.set_value(SET_SELECT_TEXT, FieldValue::text("BizA>NetB>ClusterC"))
            .unwrap();
        assert!(form.submit().ok);
    }

    #[test]
    fn service_category_expands_lazily_one_level_at_a_time() {
        let svc = console();
        let mut form = built_form();
        let effects = form.expand_tree(SERVICE_CATEGORY, "10").unwrap();
        run_to_idle(&mut form, &svc, effects).unwrap();
        let FieldData::Tree(store) = &form.field(SERVICE_CATEGORY).unwrap().data else {
            panic!("categories not loaded");
        };
        assert_eq!(store.get("10").unwrap().children, vec!["101"]);
        assert!(store.get("101").unwrap().leaf);
        // Second level is terminal.
        assert!(form.expand_tree(SERVICE_CATEGORY, "101").unwrap().is_empty());
    }
}
