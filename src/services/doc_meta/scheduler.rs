//! 任务调度
//!
//! 在引用图上做带环容忍的贪心拓扑排序：父节点依赖子节点，引用者依赖被引用者

use std::collections::{BTreeMap, HashSet};
use tabled::{Table, Tabled};
use tracing::warn;

use super::tree::DocTree;
use super::types::{ItemId, ItemStatus, WhiteListEntry};

/// 节点是否需要（重新）生成文档
///
/// 已是最新的节点、仓库/目录/文件节点不生成；其余节点必须位于某个文件下，
/// 且全名不以任何忽略前缀开头
pub fn need_to_generate(tree: &DocTree, id: ItemId, ignore_list: &[String]) -> bool {
    let item = tree.get(id);
    if item.status == ItemStatus::UpToDate || item.kind.is_container() {
        return false;
    }
    if tree.file_of(id).is_none() {
        return false;
    }
    let rel_file_path = tree.full_name(id);
    !ignore_list
        .iter()
        .any(|prefix| rel_file_path.starts_with(prefix.as_str()))
}

/// 单个任务
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub item: ItemId,
    pub item_status: ItemStatus,
    pub full_name: String,
    /// 依赖的任务编号（去重、升序）
    pub dependencies: Vec<usize>,
}

/// 调度结果
#[derive(Debug, Clone, Default)]
pub struct TaskPlan {
    /// 调度顺序，下标即任务编号
    pub order: Vec<ItemId>,
    pub tasks: BTreeMap<usize, TaskInfo>,
}

#[derive(Tabled)]
struct TaskRow {
    task_id: usize,
    #[tabled(rename = "Doc Generation Reason")]
    reason: String,
    #[tabled(rename = "Path")]
    path: String,
    dependency: String,
}

impl TaskPlan {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// 渲染任务表
    pub fn render_table(&self) -> String {
        let rows: Vec<TaskRow> = self
            .tasks
            .iter()
            .map(|(&task_id, info)| TaskRow {
                task_id,
                reason: info.item_status.as_str().to_string(),
                path: info.full_name.clone(),
                dependency: format_dependencies(&info.dependencies),
            })
            .collect();
        Table::new(rows).to_string()
    }
}

fn format_dependencies(dependencies: &[usize]) -> String {
    if dependencies.is_empty() {
        return "None".to_string();
    }
    let joined = dependencies
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let chars: Vec<char> = joined.chars().collect();
    if chars.len() > 20 {
        let head: String = chars[..8].iter().collect();
        let tail: String = chars[chars.len() - 8..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        joined
    }
}

/// 打破循环引用时的提示；`level` 为 -1 表示没有发生循环
fn cycle_break_notice(level: i64, full_name: &str) -> Option<String> {
    match level {
        l if l < 0 => None,
        0 => Some(format!("circle-reference broken on structural edges, level=0: {}", full_name)),
        l => Some(format!("circle-reference(second-best still failed), level={}: {}", l, full_name)),
    }
}

/// 计算 `start` 子树的任务顺序
///
/// `available` 决定哪些节点参与调度；`white_list` 设置后只保留
/// （所在文件, 名称）在名单上的节点。调用前会清空所有节点的 `task_id`
pub fn get_task_manager<A>(
    tree: &mut DocTree,
    start: ItemId,
    available: A,
    white_list: Option<&[WhiteListEntry]>,
) -> TaskPlan
where
    A: Fn(&DocTree, ItemId) -> bool,
{
    let all_ids: Vec<ItemId> = tree.ids().collect();
    for &id in &all_ids {
        tree.get_mut(id).task_id = None;
    }

    let is_available: Vec<bool> = all_ids.iter().map(|&id| available(tree, id)).collect();

    let mut doc_items: Vec<ItemId> = tree.travel_list(start);
    if let Some(list) = white_list {
        doc_items.retain(|&id| {
            let file_name = tree.file_name(id);
            let obj_name = &tree.get(id).obj_name;
            list.iter()
                .any(|entry| entry.file_path == file_name && &entry.id_text == obj_name)
        });
    }
    doc_items.retain(|id| is_available[id.index()]);
    // 稳定排序：同深度保持先序顺序
    doc_items.sort_by_key(|id| tree.get(*id).depth);

    let mut plan = TaskPlan::default();
    let mut scheduled: HashSet<ItemId> = HashSet::new();

    while !doc_items.is_empty() {
        let mut min_break_level: i64 = 10_000_000;
        let mut target: Option<usize> = None;

        for (pos, &candidate) in doc_items.iter().enumerate() {
            let item = tree.get(candidate);
            let mut best_break_level = 0i64;
            let mut second_best_break_level = 0i64;

            for &child in item.children.values() {
                if is_available[child.index()] && !scheduled.contains(&child) {
                    best_break_level += 1;
                }
            }
            for (idx, &referenced) in item.reference_who.iter().enumerate() {
                if !is_available[referenced.index()] || scheduled.contains(&referenced) {
                    continue;
                }
                best_break_level += 1;
                let special = item.special_reference_type.get(idx).copied().unwrap_or(false);
                if !special {
                    second_best_break_level += 1;
                }
            }

            if best_break_level == 0 {
                min_break_level = -1;
                target = Some(pos);
                break;
            }
            if second_best_break_level < min_break_level {
                target = Some(pos);
                min_break_level = second_best_break_level;
            }
        }

        let Some(pos) = target else { break };
        let target_item = doc_items.remove(pos);

        if let Some(notice) = cycle_break_notice(min_break_level, &tree.full_name(target_item)) {
            warn!("{}", notice);
        }

        let item = tree.get(target_item);
        let mut dependencies: Vec<usize> = item
            .children
            .values()
            .chain(item.reference_who.iter())
            .filter_map(|dep| tree.get(*dep).task_id)
            .collect();
        dependencies.sort_unstable();
        dependencies.dedup();

        let task_id = plan.order.len();
        let info = TaskInfo {
            item: target_item,
            item_status: item.status,
            full_name: tree.full_name(target_item),
            dependencies,
        };
        tree.get_mut(target_item).task_id = Some(task_id);
        plan.tasks.insert(task_id, info);
        plan.order.push(target_item);
        scheduled.insert(target_item);
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::doc_meta::reference::tests::{func, StubFinder};
    use crate::services::doc_meta::reference::{parse_reference, ReferenceOptions};
    use crate::services::doc_meta::tree::TreeBuilder;
    use serde_json::json;

    fn default_available(tree: &DocTree, id: ItemId) -> bool {
        need_to_generate(tree, id, &[])
    }

    #[test]
    fn test_callee_scheduled_before_caller() {
        let value = json!({ "a.py": [ func("f", 1, 2), func("g", 4, 5) ] });
        let mut tree = TreeBuilder::new().build(value.as_object().unwrap());
        let mut finder = StubFinder::default();
        finder.add("a.py", "f", "a.py", 5);
        parse_reference(&mut tree, &finder, &ReferenceOptions::new("/repo"));

        let root = tree.root();
        let plan = get_task_manager(&mut tree, root, default_available, None);

        let f = tree.find_path("a.py/f").unwrap();
        let g = tree.find_path("a.py/g").unwrap();
        assert_eq!(plan.order, vec![f, g]);
        assert_eq!(tree.get(f).task_id, Some(0));
        assert_eq!(plan.tasks[&1].dependencies, vec![0]);
        assert_eq!(plan.tasks[&1].full_name, "a.py/g");
    }

    #[test]
    fn test_mutual_reference_cycle_terminates() {
        let value = json!({ "a.py": [ func("a", 1, 2), func("b", 4, 5) ] });
        let mut tree = TreeBuilder::new().build(value.as_object().unwrap());
        let mut finder = StubFinder::default();
        finder.add("a.py", "a", "a.py", 5);
        finder.add("a.py", "b", "a.py", 2);
        parse_reference(&mut tree, &finder, &ReferenceOptions::new("/repo"));

        let root = tree.root();
        let plan = get_task_manager(&mut tree, root, default_available, None);

        let a = tree.find_path("a.py/a").unwrap();
        let b = tree.find_path("a.py/b").unwrap();
        // 都不就绪时选列表中第一个次级阻塞最小的
        assert_eq!(plan.order, vec![a, b]);
        assert!(plan.tasks[&0].dependencies.is_empty());
        assert_eq!(plan.tasks[&1].dependencies, vec![0]);
    }

    #[test]
    fn test_structural_edges_break_cycles_first() {
        let value = json!({ "a.py": [ func("a", 1, 2), func("b", 4, 5) ] });
        let mut tree = TreeBuilder::new().build(value.as_object().unwrap());
        let mut finder = StubFinder::default();
        // a 在 b 的定义行上被引用（结构性引用）；b 在 a 的函数体中被引用
        finder.add("a.py", "a", "a.py", 4);
        finder.add("a.py", "b", "a.py", 2);
        parse_reference(&mut tree, &finder, &ReferenceOptions::new("/repo"));

        let root = tree.root();
        let plan = get_task_manager(&mut tree, root, default_available, None);

        let a = tree.find_path("a.py/a").unwrap();
        let b = tree.find_path("a.py/b").unwrap();
        assert_eq!(tree.get(b).special_reference_type, vec![true]);
        assert_eq!(plan.order, vec![b, a]);
    }

    #[test]
    fn test_children_precede_parents_and_schedule_is_total() {
        let value = json!({
            "pkg/m.py": [
                json!({"type": "ClassDef", "name": "A", "md_content": [], "code_start_line": 1, "code_end_line": 10}),
                func("x", 2, 4),
                func("y", 5, 9),
                func("inner", 6, 8),
                func("top", 12, 14),
            ],
        });
        let mut tree = TreeBuilder::new().build(value.as_object().unwrap());
        let mut finder = StubFinder::default();
        finder.add("pkg/m.py", "top", "pkg/m.py", 3);
        parse_reference(&mut tree, &finder, &ReferenceOptions::new("/repo"));

        let root = tree.root();
        let candidates: Vec<ItemId> = tree.ids().filter(|&id| default_available(&tree, id)).collect();
        let plan = get_task_manager(&mut tree, root, default_available, None);
        assert_eq!(plan.len(), candidates.len());

        let position = |id: ItemId| plan.order.iter().position(|&o| o == id).unwrap();
        for &id in &plan.order {
            let item = tree.get(id);
            for &child in item.children.values() {
                assert!(position(child) < position(id));
            }
        }
        for (task_id, info) in &plan.tasks {
            assert!(info.dependencies.iter().all(|d| d < task_id));
        }
    }

    #[test]
    fn test_need_to_generate_respects_ignore_prefixes() {
        let value = json!({
            "tests/test_a.py": [ func("t", 1, 2) ],
            "src/a.py": [ func("f", 1, 2) ],
        });
        let mut tree = TreeBuilder::new().build(value.as_object().unwrap());
        let ignore = vec!["tests".to_string()];

        let t = tree.find_path("tests/test_a.py/t").unwrap();
        let f = tree.find_path("src/a.py/f").unwrap();
        let file = tree.find_path("src/a.py").unwrap();
        assert!(!need_to_generate(&tree, t, &ignore));
        assert!(need_to_generate(&tree, f, &ignore));
        assert!(!need_to_generate(&tree, file, &ignore));
        assert!(!need_to_generate(&tree, tree.root(), &ignore));

        tree.get_mut(f).status = ItemStatus::UpToDate;
        assert!(!need_to_generate(&tree, f, &ignore));
    }

    #[test]
    fn test_white_list_limits_candidates() {
        let value = json!({ "a.py": [ func("f", 1, 2), func("g", 4, 5) ] });
        let mut tree = TreeBuilder::new().build(value.as_object().unwrap());
        let white_list = vec![WhiteListEntry {
            file_path: "a.py".to_string(),
            id_text: "g".to_string(),
        }];
        let root = tree.root();
        let plan = get_task_manager(&mut tree, root, default_available, Some(&white_list));

        assert_eq!(plan.len(), 1);
        assert_eq!(plan.tasks[&0].full_name, "a.py/g");
    }

    #[test]
    fn test_render_table_elides_long_dependency_lists() {
        assert_eq!(format_dependencies(&[]), "None");
        assert_eq!(format_dependencies(&[1, 2, 3]), "1,2,3");
        let long: Vec<usize> = (0..15).collect();
        assert_eq!(format_dependencies(&long), "0,1,2,3,...12,13,14");

        let value = json!({ "a.py": [ func("f", 1, 2) ] });
        let mut tree = TreeBuilder::new().build(value.as_object().unwrap());
        let root = tree.root();
        let plan = get_task_manager(&mut tree, root, default_available, None);
        let table = plan.render_table();
        assert!(table.contains("Doc Generation Reason"));
        assert!(table.contains("a.py/f"));
        assert!(table.contains("doc_has_not_been_generated"));
    }

    #[test]
    fn test_every_cycle_break_is_reported_with_level() {
        assert_eq!(cycle_break_notice(-1, "a.py/f"), None);
        let structural = cycle_break_notice(0, "a.py/f").unwrap();
        assert!(structural.contains("level=0") && structural.contains("a.py/f"));
        let failed = cycle_break_notice(2, "a.py/g").unwrap();
        assert!(failed.contains("level=2") && failed.contains("a.py/g"));
    }
}
