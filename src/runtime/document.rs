use super::*;

use crate::alignment::AlignmentReport;

impl TrackingRuntime {
    /// Loads the page's initial HTML. The returned value is the page source,
    /// tracked by an `InitialPageHtml` record every parsed node maps back to.
    pub fn load_document(&mut self, html: &str, loc: Option<Loc>) -> Result<Tracked> {
        let tracking = self.emit(
            RecordDraft::new(Operation::InitialPageHtml, ResultValue::String(html.to_string()))
                .loc(loc),
        );
        let root = self.dom.root();
        self.dom.set_inner_html(root, html)?;
        let report = self.align(root, html, tracking, "initialPageHtml", &[]);
        tracing::info!(
            target: "dataflow_tracer::runtime",
            nodes = report.mapped_nodes,
            coarse = report.coarse_origins,
            "initial page html loaded"
        );
        Ok(Tracked::new(Value::String(html.to_string()), tracking))
    }

    /// Aligns the children `target` got from parsing `assigned`.
    pub(crate) fn align(
        &mut self,
        target: NodeId,
        assigned: &str,
        tracking: Option<LogId>,
        action: &str,
        ignore: &[NodeId],
    ) -> AlignmentReport {
        let assignment = HtmlAssignment {
            assigned,
            tracking,
            action,
            initial_extra: 0,
            nodes_to_ignore: ignore,
            validate: self.config.validate_html_mapping,
        };
        let report = map_inner_html_assignment(&self.dom, &mut self.origins, target, &assignment);
        for diagnostic in &report.diagnostics {
            tracing::warn!(
                target: "dataflow_tracer::alignment",
                action,
                diagnostic = diagnostic.as_str(),
                "html mapping mismatch"
            );
            self.trace.trace_line(format!("[align] {action}: {diagnostic}"));
        }
        report
    }

    /// `innerHTML` (or `outerHTML`) of `node` with per-character origins.
    pub fn html_mapping(&self, node: NodeId, outer: bool) -> HtmlMapping {
        HtmlMapping::build(&self.dom, &self.origins, node, outer)
    }

    pub fn text_mapping(&self, node: NodeId) -> HtmlMapping {
        HtmlMapping::text_content(&self.dom, &self.origins, node)
    }

    /// Stores a DOM read whose result is `mapping`'s text.
    pub(crate) fn read_record(
        &mut self,
        operation: Operation,
        element: &Tracked,
        mapping: HtmlMapping,
        loc: Option<Loc>,
    ) -> Option<LogId> {
        let (text, segments) = mapping.into_parts();
        self.emit(
            RecordDraft::new(operation, ResultValue::String(text))
                .arg("element", arg_ref(element))
                .runtime(RuntimeArgs {
                    segments,
                    ..RuntimeArgs::default()
                })
                .loc(loc),
        )
    }

    /// Value and provenance of a DOM property that has no call behind it.
    pub(crate) fn read_node_property(
        &mut self,
        element: &Tracked,
        node: NodeId,
        key: &str,
        loc: &Option<Loc>,
    ) -> Result<(Value, Option<LogId>)> {
        let is_character_data = matches!(
            self.dom.kind(node),
            Some(NodeKind::Text(_) | NodeKind::Comment(_))
        );
        let mapped = |rt: &mut Self, operation, mapping: HtmlMapping| {
            let value = Value::String(mapping.text().to_string());
            let record = rt.read_record(operation, element, mapping, loc.clone());
            (value, record)
        };
        let read = match key {
            "innerHTML" | "outerHTML" => {
                if is_character_data {
                    (Value::Undefined, None)
                } else {
                    let mapping = self.html_mapping(node, key == "outerHTML");
                    mapped(self, Operation::ReadElementHtml, mapping)
                }
            }
            "textContent" => {
                let mapping = self.text_mapping(node);
                mapped(self, Operation::ReadTextContent, mapping)
            }
            "nodeValue" | "data" => {
                if is_character_data {
                    let mapping = self.text_mapping(node);
                    mapped(self, Operation::ReadTextContent, mapping)
                } else {
                    (Value::Null, None)
                }
            }
            "id" | "className" => {
                let attr = if key == "id" { "id" } else { "class" };
                if self.dom.get_attribute(node, attr).is_some() {
                    let mapping = HtmlMapping::attribute_value(&self.dom, &self.origins, node, attr);
                    mapped(self, Operation::ReadAttribute, mapping)
                } else {
                    (Value::String(String::new()), None)
                }
            }
            "tagName" | "nodeName" => {
                let name = match self.dom.kind(node) {
                    Some(NodeKind::Element(element)) => element.tag_name().to_ascii_uppercase(),
                    Some(NodeKind::Text(_)) => "#text".to_string(),
                    Some(NodeKind::Comment(_)) => "#comment".to_string(),
                    Some(NodeKind::Document) => "#document".to_string(),
                    None => String::new(),
                };
                (Value::String(name), None)
            }
            "body" | "head" | "documentElement"
                if matches!(self.dom.kind(node), Some(NodeKind::Document)) =>
            {
                (self.document_property(node, key), None)
            }
            "parentNode" => (self.node_or_null(self.dom.parent(node)), None),
            "firstChild" => (
                self.node_or_null(self.dom.children(node).first().copied()),
                None,
            ),
            "lastChild" => (
                self.node_or_null(self.dom.children(node).last().copied()),
                None,
            ),
            "childNodes" => {
                let children = self
                    .dom
                    .children(node)
                    .iter()
                    .map(|child| Value::Node(*child))
                    .collect();
                (Value::new_array(children), None)
            }
            _ => (Value::Undefined, None),
        };
        Ok(read)
    }

    fn node_or_null(&self, node: Option<NodeId>) -> Value {
        node.map_or(Value::Null, Value::Node)
    }

    /// `body`, `head` and `documentElement` of the page or of a document
    /// made by `DOMParser`.
    pub(crate) fn document_property(&self, root: NodeId, key: &str) -> Value {
        let find = |tag: &str| {
            self.dom
                .descendants(root)
                .into_iter()
                .find(|node| self.dom.tag_name(*node) == Some(tag))
        };
        match key {
            "body" => self.node_or_null(find("body")),
            "head" => self.node_or_null(find("head")),
            "documentElement" => self.node_or_null(find("html")),
            _ => Value::Undefined,
        }
    }

    /// Drops the origins of nodes that are no longer in any document, such as
    /// children replaced by `innerHTML`. Reads of those nodes are untracked
    /// afterwards. Returns how many nodes were forgotten.
    pub fn forget_detached_nodes(&mut self) -> usize {
        let dom = &self.dom;
        let forgotten = self
            .origins
            .retain(|node| dom.owner_document(node).is_some());
        tracing::debug!(
            target: "dataflow_tracer::alignment",
            forgotten,
            "origins of detached nodes dropped"
        );
        forgotten
    }

    /// Seeds or overwrites a `localStorage` entry.
    pub fn set_local_storage_item(&mut self, key: &str, value: &str) {
        self.local_storage.insert(key.to_string(), value.to_string());
    }

    pub fn local_storage_item(&self, key: &str) -> Option<&str> {
        self.local_storage.get(key).map(String::as_str)
    }

    pub(crate) fn remove_local_storage_item(&mut self, key: &str) {
        self.local_storage.remove(key);
    }

    /// A stored item enters tracked code through a `LocalStorageValue` record.
    /// Missing keys read as `None` with no record.
    pub(crate) fn read_storage_item(
        &mut self,
        key: &str,
        loc: &Option<Loc>,
    ) -> (Option<Value>, Option<LogId>) {
        let Some(stored) = self.local_storage.get(key).cloned() else {
            return (None, None);
        };
        let tracking = self.emit(
            RecordDraft::new(Operation::LocalStorageValue, ResultValue::String(stored.clone()))
                .arg(
                    "propertyName",
                    ArgRef::new(ResultValue::String(key.to_string()), None),
                )
                .loc(loc.clone()),
        );
        (Some(Value::String(stored)), tracking)
    }

    /// Applies a property write to the document. `tracking` is the
    /// assignment's record.
    pub(crate) fn write_node_property(
        &mut self,
        node: NodeId,
        key: &str,
        value: &Value,
        tracking: Option<LogId>,
    ) -> Result<()> {
        match key {
            "innerHTML" => {
                let html = value.to_display_string();
                self.dom.set_inner_html(node, &html)?;
                self.align(node, &html, tracking, "assignInnerHTML", &[]);
            }
            "textContent" | "nodeValue" | "data" => {
                let is_character_data = matches!(
                    self.dom.kind(node),
                    Some(NodeKind::Text(_) | NodeKind::Comment(_))
                );
                if key != "textContent" && !is_character_data {
                    return Ok(());
                }
                let text = value.to_display_string();
                let origin = ValueOrigin::new(tracking, "assignTextContent");
                match self.dom.set_text_content(node, &text)? {
                    Some(text_node) => self.origins.set_text_value(text_node, origin),
                    None if is_character_data => self.origins.set_text_value(node, origin),
                    None => {}
                }
            }
            "id" | "className" => {
                let attr = if key == "id" { "id" } else { "class" };
                self.dom
                    .set_attribute(node, attr, &value.to_display_string())?;
                self.origins.set_attribute_parts(
                    node,
                    attr,
                    None,
                    Some(ValueOrigin::new(tracking, "assignAttribute")),
                );
            }
            _ => {}
        }
        Ok(())
    }
}
