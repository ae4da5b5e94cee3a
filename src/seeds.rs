//! Built-in exercise catalog so the backend is useful without a config file.

use crate::domain::{Difficulty, Exercise, Task, TaskStep};

fn step(instruction: &str, solution: &str) -> TaskStep {
  TaskStep {
    instruction: instruction.into(),
    solution: solution.into(),
    validation_command: Some(solution.into()),
  }
}

fn task(id: &str, question: &str, solution: &str, steps: Vec<TaskStep>) -> Task {
  Task {
    id: id.into(),
    question: question.into(),
    description: question.into(),
    hints: vec![],
    solution: solution.into(),
    steps,
  }
}

pub fn seed_exercises() -> Vec<Exercise> {
  vec![
    Exercise {
      id: "git-basics".into(),
      title: "Git Basics".into(),
      description: "Create a repository and record your first commits.".into(),
      content: "Git tracks snapshots of your project. Every snapshot is a commit.".into(),
      difficulty: Difficulty::Beginner,
      estimated_time: "15 minutes".into(),
      prerequisites: vec![],
      tasks: vec![
        task("init", "Initialise a repository", "git init", vec![]),
        task(
          "first-commit",
          "Stage and commit a file",
          "git commit -m \"first\"",
          vec![
            step("Create README.md and stage it", "git add README.md"),
            step("Commit the staged file", "git commit -m \"first\""),
            step("Inspect the history", "git log --oneline"),
          ],
        ),
        task("status", "Check the working tree", "git status", vec![]),
      ],
    },
    Exercise {
      id: "branching".into(),
      title: "Branching and Merging".into(),
      description: "Work on a feature branch and merge it back.".into(),
      content: "Branches are movable pointers to commits.".into(),
      difficulty: Difficulty::Intermediate,
      estimated_time: "25 minutes".into(),
      prerequisites: vec!["git-basics".into()],
      tasks: vec![
        task(
          "feature-branch",
          "Create and switch to a feature branch",
          "git switch -c feature",
          vec![
            step("Create the branch", "git branch feature"),
            step("Switch to it", "git switch feature"),
          ],
        ),
        task(
          "merge",
          "Merge the feature branch into main",
          "git merge feature",
          vec![
            step("Switch back to main", "git switch main"),
            step("Merge the feature branch", "git merge feature"),
            step("Delete the merged branch", "git branch -d feature"),
          ],
        ),
      ],
    },
    Exercise {
      id: "remotes".into(),
      title: "Working with Remotes".into(),
      description: "Publish commits and pull changes from collaborators.".into(),
      content: "A remote is another copy of the repository you can sync with.".into(),
      difficulty: Difficulty::Advanced,
      estimated_time: "20 minutes".into(),
      prerequisites: vec!["branching".into()],
      tasks: vec![
        task("add-remote", "Register the origin remote", "git remote add origin <url>", vec![]),
        task("push", "Push main and set upstream", "git push -u origin main", vec![]),
      ],
    },
  ]
}
