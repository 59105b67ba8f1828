use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::binding::{FormBinder, FormModel};
use crate::mapping::{
    CollectionAccessors, ConfigurationError, MappingEngine, Projection, RelationMembers,
    RelationsConfig, SingleAccessors,
};
use crate::model::{
    detach_reference, hydrate_reference, Choice, Choices, Entity, EntityMeta, EntityViewModel,
    Member, ModelState, RowSource, ViewModelMeta, Violation,
};
use crate::store::MemoryStore;

pub const MAX_CATEGORY_NAME: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub meta: EntityMeta,
    pub name: String,
}

const TAG_MEMBERS: &[Member] = &[Member::scalar("Name")];

impl Entity for Tag {
    const TYPE_NAME: &'static str = "Tag";

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn members() -> &'static [Member] {
        TAG_MEMBERS
    }

    fn validate(&self) -> Vec<Violation> {
        if self.name.trim().is_empty() {
            vec![Violation::on("Name", "The Name field is required.")]
        } else {
            Vec::new()
        }
    }

    fn label(&self) -> String {
        self.name.clone()
    }
}

/// Self-referential demo entity: a category may sit under a parent category
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub meta: EntityMeta,
    pub name: String,
    pub description: Option<String>,
    pub parent: Option<Box<Category>>,
    pub tags: Vec<Tag>,
}

const CATEGORY_MEMBERS: &[Member] = &[
    Member::scalar("Name"),
    Member::scalar("Description"),
    Member::reference("Parent", "Category"),
    Member::collection("Tags", "Tag"),
];

impl Entity for Category {
    const TYPE_NAME: &'static str = "Category";

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn members() -> &'static [Member] {
        CATEGORY_MEMBERS
    }

    fn validate(&self) -> Vec<Violation> {
        let mut violations = Vec::new();
        if self.name.trim().is_empty() {
            violations.push(Violation::on("Name", "The Name field is required."));
        } else if self.name.chars().count() > MAX_CATEGORY_NAME {
            violations.push(Violation::on(
                "Name",
                format!(
                    "The field Name must be a string with a maximum length of {}.",
                    MAX_CATEGORY_NAME
                ),
            ));
        }
        if self.parent.as_ref().map(|parent| parent.id()) == Some(self.id()) {
            violations.push(Violation::on("Parent", "A category cannot be its own parent."));
        }
        violations
    }

    fn label(&self) -> String {
        self.name.clone()
    }

    fn detach_relations(&mut self) {
        if let Some(parent) = self.parent.as_deref_mut() {
            detach_reference(parent);
        }
        self.tags.iter_mut().for_each(detach_reference);
    }

    fn hydrate_relations<S: RowSource>(&mut self, rows: &S) {
        if let Some(parent) = self.parent.as_deref_mut() {
            hydrate_reference(parent, rows);
        }
        for tag in &mut self.tags {
            hydrate_reference(tag, rows);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagViewModel {
    #[serde(flatten)]
    pub meta: ViewModelMeta<TagViewModel>,
    pub name: String,
}

impl EntityViewModel for TagViewModel {
    fn meta(&self) -> &ViewModelMeta<Self> {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ViewModelMeta<Self> {
        &mut self.meta
    }
}

impl Projection<Tag> for TagViewModel {
    fn read_scalars(&mut self, entity: &Tag) {
        self.name = entity.name.clone();
    }

    fn write_scalars(&self, entity: &mut Tag) {
        entity.name = self.name.clone();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryViewModel {
    #[serde(flatten)]
    pub meta: ViewModelMeta<CategoryViewModel>,
    pub name: String,
    pub description: Option<String>,
    pub parent: Choice<CategoryViewModel>,
    pub tags: Choices<TagViewModel>,
}

impl EntityViewModel for CategoryViewModel {
    fn meta(&self) -> &ViewModelMeta<Self> {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ViewModelMeta<Self> {
        &mut self.meta
    }
}

fn parent(category: &Category) -> Option<&Category> {
    category.parent.as_deref()
}

fn set_parent(category: &mut Category, parent: Option<Category>) {
    category.parent = parent.map(Box::new);
}

fn parent_choice(vm: &CategoryViewModel) -> &Choice<CategoryViewModel> {
    &vm.parent
}

fn parent_choice_mut(vm: &mut CategoryViewModel) -> &mut Choice<CategoryViewModel> {
    &mut vm.parent
}

fn tags(category: &Category) -> &[Tag] {
    &category.tags
}

fn tags_mut(category: &mut Category) -> &mut Vec<Tag> {
    &mut category.tags
}

fn tag_choices(vm: &CategoryViewModel) -> &Choices<TagViewModel> {
    &vm.tags
}

fn tag_choices_mut(vm: &mut CategoryViewModel) -> &mut Choices<TagViewModel> {
    &mut vm.tags
}

impl Projection<Category> for CategoryViewModel {
    fn read_scalars(&mut self, entity: &Category) {
        self.name = entity.name.clone();
        self.description = entity.description.clone();
    }

    fn write_scalars(&self, entity: &mut Category) {
        entity.name = self.name.clone();
        entity.description = self.description.clone();
    }

    fn relations(members: &mut RelationMembers<'_, Category, Self>) {
        members
            .choice::<Category, CategoryViewModel>(
                "Parent",
                SingleAccessors {
                    get: parent,
                    set: set_parent,
                    choice: parent_choice,
                    choice_mut: parent_choice_mut,
                },
            )
            .choices::<Tag, TagViewModel>(
                "Tags",
                CollectionAccessors {
                    get: tags,
                    get_mut: tags_mut,
                    choices: tag_choices,
                    choices_mut: tag_choices_mut,
                },
            );
    }
}

impl FormModel for CategoryViewModel {
    fn bind(binder: &FormBinder<'_>, state: &mut ModelState) -> Self {
        let mut view_model = CategoryViewModel::default();
        if let Some(id) = binder.bind_identity(state) {
            view_model.meta.identify(id);
        }
        view_model.meta.version = binder.bind_version(state);

        view_model.name = binder.text("Name").trim().to_string();
        if view_model.name.is_empty() {
            state.add_error(binder.key("Name"), "The Name field is required.");
        }
        view_model.description = binder.optional_text("Description");
        view_model.parent = binder.bind_choice("Parent", state);
        view_model.tags = binder.bind_choices("Tags", state);
        view_model
    }
}

/// Relation registry for categories: any other category may be the parent,
/// any tag may be attached
pub fn category_relations(store: Arc<MemoryStore>) -> Result<RelationsConfig<Category>, ConfigurationError> {
    let mut relations = RelationsConfig::<Category>::new();

    let categories = store.clone();
    relations
        .relation("Parent")?
        .has_options(move |_: &Category| categories.all::<Category>())?
        .uses_label(|vm: &CategoryViewModel| vm.name.clone())
        .can_choose_self(false);

    relations
        .relation("Tags")?
        .has_options(move |_: &Category| store.all::<Tag>())?
        .uses_label(|vm: &TagViewModel| vm.name.clone());

    Ok(relations)
}

pub fn build_engine(
    relations: &RelationsConfig<Category>,
    max_option_depth: usize,
) -> Result<MappingEngine, ConfigurationError> {
    let tag_relations = RelationsConfig::<Tag>::new();
    Ok(MappingEngine::builder()
        .max_option_depth(max_option_depth)
        .register::<Category, CategoryViewModel>(relations)?
        .register::<Tag, TagViewModel>(&tag_relations)?
        .build())
}

fn tag(name: &str) -> Tag {
    Tag {
        name: name.to_string(),
        ..Tag::default()
    }
}

fn category(name: &str, description: &str, parent: Option<&Category>, tags: &[&Tag]) -> Category {
    Category {
        name: name.to_string(),
        description: Some(description.to_string()),
        parent: parent.cloned().map(Box::new),
        tags: tags.iter().map(|tag| (*tag).clone()).collect(),
        ..Category::default()
    }
}

/// Demo workshop catalog
pub fn load_seed_data(store: &MemoryStore) {
    let hand = store.insert(tag("hand"));
    let power = store.insert(tag("power"));
    let outdoor = store.insert(tag("outdoor"));

    let tools = store.insert(category("Tools", "Everything for the workshop", None, &[&hand]));
    store.insert(category(
        "Power Tools",
        "Drills, saws and sanders",
        Some(&tools),
        &[&power],
    ));
    store.insert(category(
        "Garden",
        "Tools for outside",
        Some(&tools),
        &[&hand, &outdoor],
    ));

    log::info!(
        "Seeded {} categories and {} tags",
        store.count::<Category>(),
        store.count::<Tag>()
    );
}
